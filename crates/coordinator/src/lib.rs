//! Agent Coordinator - multi-agent coordination engine
//!
//! This crate runs requests across several agents (sequential, parallel,
//! collaborative and debate modes), executes them as trackable jobs, streams
//! their progress to subscribers, and caches and rate-limits agent traffic.

mod agent;
mod cache;
mod client;
mod config;
mod coordinator;
mod engine;
mod error;
mod gateway;
mod job;
mod rate_limit;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::{Agent, AgentRegistry};
pub use cache::{CacheEntry, CacheStats, ResponseCache};
pub use client::RemoteAgent;
pub use config::{
    CacheConfig, CoordinatorConfig, EngineConfig, JobConfig, RateLimitConfig, ReconnectPolicy,
    SynthesisMode,
};
pub use coordinator::{CoordinationEvent, Coordinator, RunControl, COORDINATOR_SENDER, EVENT_BUFFER};
pub use engine::Engine;
pub use error::{AgentError, CoordinationError, JobError, RateLimited, Result, StreamError};
pub use gateway::{
    is_visible, visible_view, ChannelTransport, ControlFrame, EventBuffer, NoReconnect, Reconnector,
    StreamOutcome, StreamSession, StreamingGateway, Transport, TransportError,
};
pub use job::JobManager;
pub use rate_limit::{
    RateLimitAlgorithm, RateLimitRule, RateLimiter, ENDPOINT_COORDINATE, ENDPOINT_STREAM,
    ENDPOINT_SUBMIT,
};
