//! In-process store
//!
//! Authoritative only for single-process deployments and tests. Multi-process
//! deployments use it solely as a fail-open fallback.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::KvStore;
use crate::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn replace(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) else {
            return Ok(false);
        };
        *entry = Entry {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let current = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .cloned();

        let (count, expires_at) = match current {
            Some(entry) => (
                entry.value.parse::<u64>().unwrap_or(0) + 1,
                entry.expires_at,
            ),
            None => (1, Some(now + ttl)),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn decr(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) else {
            return Ok(0);
        };
        let count = entry.value.parse::<u64>().unwrap_or(0).saturating_sub(1);
        entry.value = count.to_string();
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
