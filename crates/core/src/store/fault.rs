//! Store wrapper that can simulate an outage of the wrapped store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::KvStore;
use crate::{Error, Result};

/// Delegates to an inner store until switched into outage mode, in which every
/// call fails with [`Error::StoreUnavailable`]. Used for failover drills.
pub struct FaultInjectingStore {
    inner: Arc<dyn KvStore>,
    failing: AtomicBool,
}

impl FaultInjectingStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(format!(
                "{} store is unreachable",
                self.inner.name()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FaultInjectingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn replace(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        self.check()?;
        self.inner.replace(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.check()?;
        self.inner.incr(key, ttl).await
    }

    async fn decr(&self, key: &str) -> Result<u64> {
        self.check()?;
        self.inner.decr(key).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn test_outage_and_recovery() {
        let store = FaultInjectingStore::new(Arc::new(MemoryKvStore::new()));
        store.set("k", "v".to_string(), None).await.unwrap();

        store.set_failing(true);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_transient());

        store.set_failing(false);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
