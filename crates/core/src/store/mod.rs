//! Fleet-shared key-value store
//!
//! Job records, cache entries and rate-limit counters all live behind this
//! narrow interface so that any process in the fleet can serve any key.
//! Values are JSON strings; expiry is handled by the store.

mod fault;
mod file;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

pub use fault::FaultInjectingStore;
pub use file::FileKvStore;
pub use memory::MemoryKvStore;

/// Key-value store with per-key expiry
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value; expired keys read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored at `key`. `None` ttl means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Overwrite `key` only while it holds a live value; returns whether the
    /// write happened. Atomic with respect to `delete` of the same key.
    async fn replace(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;

    /// Remove a key, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increment a counter. The ttl is applied when the counter is created.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Atomically decrement a live counter, never below zero. A missing
    /// counter stays missing and reads as 0.
    async fn decr(&self, key: &str) -> Result<u64>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, ttl).await
}
