//! Per-identity, per-endpoint rate limiting on shared counters

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conclave_core::store::KvStore;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::RateLimited;

pub const ENDPOINT_SUBMIT: &str = "submit";
pub const ENDPOINT_COORDINATE: &str = "coordinate";
pub const ENDPOINT_STREAM: &str = "stream";

const KEY_PREFIX: &str = "ratelimit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitAlgorithm {
    /// Counter per aligned window
    Fixed,
    /// Current window plus the previous one weighted by its remaining overlap
    #[default]
    Sliding,
}

impl FromStr for RateLimitAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" | "fixed_window" => Ok(Self::Fixed),
            "sliding" | "sliding_window" => Ok(Self::Sliding),
            other => Err(format!("Unknown rate limit algorithm: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window: Duration,
    pub algorithm: RateLimitAlgorithm,
}

impl From<&RateLimitConfig> for RateLimitRule {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: config.window,
            algorithm: config.algorithm,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    rules: HashMap<String, RateLimitRule>,
}

impl RateLimiter {
    /// Limiter applying the configured rule to every rate-limited endpoint
    pub fn new(store: Arc<dyn KvStore>, config: &RateLimitConfig) -> Self {
        let rule = RateLimitRule::from(config);
        let rules = [ENDPOINT_SUBMIT, ENDPOINT_COORDINATE, ENDPOINT_STREAM]
            .into_iter()
            .map(|endpoint| (endpoint.to_string(), rule.clone()))
            .collect();
        Self { store, rules }
    }

    pub fn with_rule(mut self, endpoint: impl Into<String>, rule: RateLimitRule) -> Self {
        self.rules.insert(endpoint.into(), rule);
        self
    }

    pub fn rule(&self, endpoint: &str) -> Option<&RateLimitRule> {
        self.rules.get(endpoint)
    }

    pub async fn check(&self, identity: &str, endpoint: &str) -> Result<(), RateLimited> {
        self.check_at(identity, endpoint, Utc::now()).await
    }

    /// Count one request at `now`. A refused request is not counted, so the
    /// retry hint stays valid for a client that honours it. Endpoints without a
    /// rule are not limited; an unreachable store lets the request through.
    pub async fn check_at(
        &self,
        identity: &str,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimited> {
        let Some(rule) = self.rules.get(endpoint) else {
            return Ok(());
        };
        let window_ms = rule.window.as_millis().max(1000) as u64;
        let now_ms = now.timestamp_millis().max(0) as u64;
        let index = now_ms / window_ms;
        let elapsed_ms = now_ms % window_ms;
        let ttl = Duration::from_millis(window_ms * 2);

        let counter = key(endpoint, identity, index);
        let current = match self.store.incr(&counter, ttl).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Rate limit store unavailable, allowing request: {}", e);
                return Ok(());
            }
        };

        let retry_after_ms = match rule.algorithm {
            RateLimitAlgorithm::Fixed => {
                (current > rule.limit).then(|| window_ms - elapsed_ms)
            }
            RateLimitAlgorithm::Sliding => {
                let previous = self.previous_count(endpoint, identity, index).await;
                sliding_retry_after(rule.limit, current, previous, elapsed_ms, window_ms)
            }
        };

        match retry_after_ms {
            None => Ok(()),
            Some(ms) => {
                if let Err(e) = self.store.decr(&counter).await {
                    warn!("Failed to release refused request on {}: {}", counter, e);
                }
                let retry_after_secs = ms.div_ceil(1000).max(1);
                debug!(
                    "Rate limited {} on {}; retry after {}s",
                    identity, endpoint, retry_after_secs
                );
                Err(RateLimited {
                    endpoint: endpoint.to_string(),
                    limit: rule.limit,
                    window_secs: window_ms / 1000,
                    retry_after_secs,
                })
            }
        }
    }

    async fn previous_count(&self, endpoint: &str, identity: &str, index: u64) -> u64 {
        let Some(previous) = index.checked_sub(1) else {
            return 0;
        };
        match self.store.get(&key(endpoint, identity, previous)).await {
            Ok(raw) => raw.and_then(|raw| raw.trim().parse().ok()).unwrap_or(0),
            Err(e) => {
                debug!("Previous rate window unreadable: {}", e);
                0
            }
        }
    }
}

/// Milliseconds until a request would fit under `limit`, or `None` when this
/// one does. `current` counts this request; `previous` is the full count of the
/// preceding window, weighted by how much of it still overlaps.
fn sliding_retry_after(
    limit: u64,
    current: u64,
    previous: u64,
    elapsed_ms: u64,
    window_ms: u64,
) -> Option<u64> {
    // Scaled by window_ms to stay in integers:
    // previous * (w - t) / w + current <= limit
    let fits = |previous: u64, current: u64, elapsed: u64| {
        previous * (window_ms - elapsed) + current * window_ms <= limit * window_ms
    };
    if fits(previous, current, elapsed_ms) {
        return None;
    }
    let remaining = window_ms - elapsed_ms;
    if limit == 0 {
        return Some(remaining);
    }
    if current <= limit {
        // Earliest t in this window where the previous window has aged out enough
        let at_ms = window_ms - (limit - current) * window_ms / previous;
        return Some(at_ms.saturating_sub(elapsed_ms).max(1));
    }
    // This window is full; its accepted requests become the next window's
    // previous count, weighed against a single new request
    let carried = current - 1;
    let next_ms = window_ms - ((limit - 1) * window_ms / carried).min(window_ms);
    Some(remaining + next_ms)
}

fn key(endpoint: &str, identity: &str, index: u64) -> String {
    format!("{}{}:{}:{}", KEY_PREFIX, endpoint, identity, index)
}
