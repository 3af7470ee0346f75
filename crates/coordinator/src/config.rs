//! Engine configuration
//!
//! Every knob has a default and can be overridden from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::RateLimitAlgorithm;

const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONSULTATIONS: u32 = 3;
const DEFAULT_DEBATE_ROUNDS: u32 = 2;
const DEFAULT_JOB_BUDGET_SECS: u64 = 10 * 60;
const DEFAULT_JOB_TTL_SECS: u64 = 60 * 60;
const DEFAULT_JOB_GRACE_SECS: u64 = 60;
const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BASE_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 8_000;
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u64 = 30;

/// How surviving outputs are merged into one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthesisMode {
    /// Labelled concatenation in declared agent order, no extra agent call
    #[default]
    Deterministic,
    /// The primary agent reconciles the outputs in one more call
    Primary,
}

impl FromStr for SynthesisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "primary" | "agent" => Ok(Self::Primary),
            other => Err(format!("Unknown synthesis mode: {}", other)),
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-agent call timeout
    pub agent_timeout: Duration,
    /// Collaborative mode: consultations allowed per run
    pub max_consultations: u32,
    /// Debate mode: rounds used when the request does not say
    pub debate_rounds: u32,
    pub synthesis: SynthesisMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            max_consultations: DEFAULT_MAX_CONSULTATIONS,
            debate_rounds: DEFAULT_DEBATE_ROUNDS,
            synthesis: SynthesisMode::default(),
        }
    }
}

/// Job manager settings
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Wall-clock budget of one job run
    pub budget: Duration,
    /// How long terminal jobs stay readable
    pub ttl: Duration,
    /// Slack added to the budget before an unfinished job counts as orphaned
    pub grace: Duration,
}

impl JobConfig {
    /// Age after which a non-terminal job is reported as timed out
    pub fn orphan_after(&self) -> Duration {
        self.budget + self.grace
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(DEFAULT_JOB_BUDGET_SECS),
            ttl: Duration::from_secs(DEFAULT_JOB_TTL_SECS),
            grace: Duration::from_secs(DEFAULT_JOB_GRACE_SECS),
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Duplex stream reconnection: bounded exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

/// Rate limiter settings
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window: Duration,
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT_PER_MINUTE,
            window: Duration::from_secs(60),
            algorithm: RateLimitAlgorithm::default(),
        }
    }
}

/// Everything the engine needs, grouped per component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub coordinator: CoordinatorConfig,
    pub jobs: JobConfig,
    pub cache: CacheConfig,
    pub reconnect: ReconnectPolicy,
    pub rate_limit: RateLimitConfig,
    /// Bound on the synchronous request path
    pub sync_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            jobs: JobConfig::default(),
            cache: CacheConfig::default(),
            reconnect: ReconnectPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Build from `CONCLAVE_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            coordinator: CoordinatorConfig {
                agent_timeout: env_secs(
                    "CONCLAVE_AGENT_TIMEOUT_SECS",
                    defaults.coordinator.agent_timeout,
                ),
                max_consultations: env_parse(
                    "CONCLAVE_MAX_CONSULTATIONS",
                    defaults.coordinator.max_consultations,
                ),
                debate_rounds: env_parse("CONCLAVE_DEBATE_ROUNDS", defaults.coordinator.debate_rounds)
                    .max(1),
                synthesis: env_parse("CONCLAVE_SYNTHESIS", defaults.coordinator.synthesis),
            },
            jobs: JobConfig {
                budget: env_secs("CONCLAVE_JOB_BUDGET_SECS", defaults.jobs.budget),
                ttl: env_secs("CONCLAVE_JOB_TTL_SECS", defaults.jobs.ttl),
                grace: env_secs("CONCLAVE_JOB_GRACE_SECS", defaults.jobs.grace),
            },
            cache: CacheConfig {
                enabled: env_flag("CONCLAVE_CACHE_ENABLED", defaults.cache.enabled),
                ttl: env_secs("CONCLAVE_CACHE_TTL_SECS", defaults.cache.ttl),
            },
            reconnect: ReconnectPolicy {
                max_attempts: env_parse(
                    "CONCLAVE_RECONNECT_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                ),
                base_delay: Duration::from_millis(env_parse(
                    "CONCLAVE_RECONNECT_BASE_MS",
                    DEFAULT_RECONNECT_BASE_MS,
                )),
                max_delay: defaults.reconnect.max_delay,
            },
            rate_limit: RateLimitConfig {
                limit: env_parse("CONCLAVE_RATE_LIMIT_PER_MINUTE", defaults.rate_limit.limit),
                window: defaults.rate_limit.window,
                algorithm: env_parse(
                    "CONCLAVE_RATE_LIMIT_ALGORITHM",
                    defaults.rate_limit.algorithm,
                ),
            },
            sync_timeout: env_secs("CONCLAVE_SYNC_TIMEOUT_SECS", defaults.sync_timeout),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
