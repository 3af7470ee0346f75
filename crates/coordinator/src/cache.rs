//! Response cache
//!
//! Agent responses are cached in the shared store under a content hash of the
//! agent, the normalized message history and the stable part of the request
//! context. The cache never fails a request: when the shared store errors the
//! lookup is a miss and an in-process fallback takes over until the store
//! answers again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conclave_core::agent::{AgentMessage, AgentResponse, ContextMap};
use conclave_core::store::{KvStore, MemoryKvStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;

const KEY_PREFIX: &str = "cache:";

/// Context keys that change on every request and would defeat caching
const VOLATILE_KEYS: &[&str] = &[
    "request_id",
    "session_id",
    "trace_id",
    "job_id",
    "stream_id",
    "timestamp",
];

/// Stored cache record. Entries are replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: AgentResponse,
    pub ttl_secs: u64,
    pub hit_count: u64,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let age = (now - self.stored_at).to_std().unwrap_or_default();
        Duration::from_secs(self.ttl_secs).checked_sub(age)
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub store_errors: u64,
    pub fallback_hits: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_errors: AtomicU64,
    fallback_hits: AtomicU64,
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    fallback: Arc<MemoryKvStore>,
    ttl: Duration,
    enabled: bool,
    counters: Arc<Counters>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            fallback: Arc::new(MemoryKvStore::new()),
            ttl: config.ttl,
            enabled: config.enabled,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Derive the cache key for one agent invocation
    pub fn key_for(agent: &str, messages: &[AgentMessage], context: &ContextMap) -> String {
        let history: Vec<Value> = messages
            .iter()
            .map(|m| json!([m.role.as_str(), m.content.trim()]))
            .collect();
        let canonical = json!({
            "agent": agent,
            "messages": history,
            "context": stable_context(context),
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Look up a cached response
    pub async fn get(&self, key: &str) -> Option<AgentResponse> {
        if !self.enabled {
            return None;
        }
        let storage_key = storage_key(key);

        match self.store.get(&storage_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.record_hit(&storage_key, entry.clone()).await;
                    Some(entry.value)
                }
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    let _ = self.store.delete(&storage_key).await;
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache store {} unavailable on read: {}", self.store.name(), e);
                self.fallback_get(&storage_key).await
            }
        }
    }

    /// Store a response with the configured ttl
    pub async fn set(&self, key: &str, value: &AgentResponse) {
        self.set_with_ttl(key, value, self.ttl).await;
    }

    pub async fn set_with_ttl(&self, key: &str, value: &AgentResponse, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }
        let storage_key = storage_key(key);
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.clone(),
            ttl_secs: ttl.as_secs().max(1),
            hit_count: 0,
            stored_at: Utc::now(),
        };
        let Ok(raw) = serde_json::to_string(&entry) else {
            return;
        };

        if let Err(e) = self.store.set(&storage_key, raw.clone(), Some(ttl)).await {
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Cache store {} unavailable on write: {}", self.store.name(), e);
            let _ = self.fallback.set(&storage_key, raw, Some(ttl)).await;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
            fallback_hits: self.counters.fallback_hits.load(Ordering::Relaxed),
        }
    }

    /// Rewrite the entry with its hit count bumped and the remaining ttl
    async fn record_hit(&self, storage_key: &str, mut entry: CacheEntry) {
        let Some(remaining) = entry.remaining(Utc::now()).filter(|d| !d.is_zero()) else {
            return;
        };
        entry.hit_count += 1;
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = self.store.set(storage_key, raw, Some(remaining)).await {
                    debug!("Failed to record cache hit: {}", e);
                }
            }
            Err(e) => debug!("Failed to encode cache entry: {}", e),
        }
    }

    async fn fallback_get(&self, storage_key: &str) -> Option<AgentResponse> {
        let raw = self.fallback.get(storage_key).await.ok().flatten();
        match raw.and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok()) {
            Some(entry) => {
                self.counters.fallback_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

fn storage_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

/// Identifier-like scalar context values that make a response reusable
fn stable_context(context: &ContextMap) -> ContextMap {
    context
        .iter()
        .filter(|(key, value)| {
            (key.as_str() == "id" || key.ends_with("_id"))
                && !key.starts_with('_')
                && !VOLATILE_KEYS.contains(&key.as_str())
                && !value.is_object()
                && !value.is_array()
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::store::FaultInjectingStore;

    fn cache_with(store: Arc<dyn KvStore>) -> ResponseCache {
        ResponseCache::new(
            store,
            &CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = cache_with(Arc::new(MemoryKvStore::new()));
        let response = AgentResponse::new("pm", "cached answer");
        cache.set("k1", &response).await;

        let hit = cache.get("k1").await.unwrap();
        assert_eq!(hit.content, "cached answer");
        assert!(cache.get("k2").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache_with(Arc::new(MemoryKvStore::new()));
        cache
            .set_with_ttl("k", &AgentResponse::new("pm", "v"), Duration::from_secs(1))
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_hit_rewrites_whole_entry() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = cache_with(store.clone());
        cache.set("k", &AgentResponse::new("pm", "v")).await;
        cache.get("k").await;
        cache.get("k").await;

        let raw = store.get("cache:k").await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.value.content, "v");
    }

    #[tokio::test]
    async fn test_outage_fails_open_to_fallback() {
        let faulty = Arc::new(FaultInjectingStore::new(Arc::new(MemoryKvStore::new())));
        let cache = cache_with(faulty.clone());

        faulty.set_failing(true);
        assert!(cache.get("k").await.is_none());
        cache.set("k", &AgentResponse::new("pm", "during outage")).await;
        assert_eq!(cache.get("k").await.unwrap().content, "during outage");

        // Once the store answers again the fallback is ignored
        faulty.set_failing(false);
        assert!(cache.get("k").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.store_errors, 3);
        assert_eq!(stats.fallback_hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = ResponseCache::new(
            Arc::new(MemoryKvStore::new()),
            &CacheConfig {
                enabled: false,
                ttl: Duration::from_secs(60),
            },
        );
        cache.set("k", &AgentResponse::new("pm", "v")).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_key_ignores_volatile_context_and_whitespace() {
        let messages = vec![AgentMessage::user("  What is the plan? ")];
        let trimmed = vec![AgentMessage::user("What is the plan?")];

        let mut a = ContextMap::new();
        a.insert("project_id".into(), json!("p1"));
        a.insert("request_id".into(), json!("r1"));
        a.insert("_debug_id".into(), json!("x"));
        a.insert("notes".into(), json!("free text"));

        let mut b = ContextMap::new();
        b.insert("project_id".into(), json!("p1"));
        b.insert("request_id".into(), json!("r2"));

        assert_eq!(
            ResponseCache::key_for("pm", &messages, &a),
            ResponseCache::key_for("pm", &trimmed, &b)
        );
    }

    #[test]
    fn test_key_depends_on_agent_and_stable_context() {
        let messages = vec![AgentMessage::user("q")];
        let mut a = ContextMap::new();
        a.insert("project_id".into(), json!("p1"));
        let mut b = ContextMap::new();
        b.insert("project_id".into(), json!("p2"));

        let base = ResponseCache::key_for("pm", &messages, &a);
        assert_ne!(base, ResponseCache::key_for("ux", &messages, &a));
        assert_ne!(base, ResponseCache::key_for("pm", &messages, &b));
        assert_eq!(base.len(), 64);
    }
}
