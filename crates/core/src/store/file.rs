//! Directory-backed store shared by every process that mounts the same volume
//!
//! Directory structure:
//! ```text
//! {root}/
//!   {escaped_key}.json   # {"value": "...", "expires_at": "..."}
//!   {escaped_key}.lock   # held during read-modify-write and delete
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::KvStore;
use crate::{Error, Result};

const LOCK_RETRIES: u32 = 200;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(5);
const STALE_LOCK_AGE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        });
        Self { value, expires_at }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Utc::now())
    }
}

/// File-based key-value store using one JSON document per key
#[derive(Debug, Clone)]
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Create the store, making sure the root directory exists
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| unavailable(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", escape_key(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", escape_key(key)))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredValue>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<StoredValue>(&content) {
                Ok(stored) => Ok(Some(stored)),
                Err(e) => {
                    warn!("Ignoring malformed store entry {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(path, e)),
        }
    }

    /// Write via a temp file and rename so readers never see a torn value
    async fn write(&self, path: &Path, stored: &StoredValue) -> Result<()> {
        let content = serde_json::to_string(stored)?;
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| unavailable(path, e))?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str) -> Result<LockGuard> {
        let path = self.lock_path(key);
        for _ in 0..LOCK_RETRIES {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(LockGuard { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        debug!("Breaking stale lock {}", path.display());
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(unavailable(&path, e)),
            }
        }
        Err(Error::StoreUnavailable(format!(
            "Timed out waiting for lock {}",
            path.display()
        )))
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map_or(false, |age| age > STALE_LOCK_AGE)
}

fn unavailable(path: &Path, err: std::io::Error) -> Error {
    Error::StoreUnavailable(format!("{}: {}", path.display(), err))
}

/// Map a key to a file-name-safe string, escaping everything but `[A-Za-z0-9._-]`
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' => {
                escaped.push(byte as char)
            }
            other => escaped.push_str(&format!("%{:02X}", other)),
        }
    }
    escaped
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.value_path(key);
        Ok(self
            .read(&path)
            .await?
            .filter(StoredValue::is_live)
            .map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let path = self.value_path(key);
        self.write(&path, &StoredValue::new(value, ttl)).await
    }

    async fn replace(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let _lock = self.acquire_lock(key).await?;
        let path = self.value_path(key);
        if !self.read(&path).await?.map_or(false, |s| s.is_live()) {
            return Ok(false);
        }
        self.write(&path, &StoredValue::new(value, ttl)).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _lock = self.acquire_lock(key).await?;
        let path = self.value_path(key);
        let live = self.read(&path).await?.map_or(false, |s| s.is_live());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(live),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let _lock = self.acquire_lock(key).await?;
        let path = self.value_path(key);

        let next = match self.read(&path).await?.filter(StoredValue::is_live) {
            Some(stored) => StoredValue {
                value: (stored.value.parse::<u64>().unwrap_or(0) + 1).to_string(),
                expires_at: stored.expires_at,
            },
            None => StoredValue::new("1".to_string(), Some(ttl)),
        };

        self.write(&path, &next).await?;
        Ok(next.value.parse::<u64>().unwrap_or(1))
    }

    async fn decr(&self, key: &str) -> Result<u64> {
        let _lock = self.acquire_lock(key).await?;
        let path = self.value_path(key);
        let Some(stored) = self.read(&path).await?.filter(StoredValue::is_live) else {
            return Ok(0);
        };
        let count = stored.value.parse::<u64>().unwrap_or(0).saturating_sub(1);
        let next = StoredValue {
            value: count.to_string(),
            expires_at: stored.expires_at,
        };
        self.write(&path, &next).await?;
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
