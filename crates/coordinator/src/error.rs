//! Error types for agent-coordinator

use std::time::Duration;

use conclave_core::coordination::DegradedAgent;
use conclave_core::job::JobStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Failure of a single agent invocation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The agent is not registered or cannot be reached
    #[error("Agent {agent} is unavailable: {message}")]
    Unavailable { agent: String, message: String },

    /// The agent did not answer within its call timeout
    #[error("Agent {agent} timed out after {seconds}s")]
    Timeout { agent: String, seconds: u64 },

    /// The agent answered but could not perform the request
    #[error("Agent {agent} could not handle the request: {message}")]
    Capability { agent: String, message: String },
}

impl AgentError {
    pub fn unavailable(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn capability(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn timeout(agent: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            agent: agent.into(),
            seconds: timeout.as_secs(),
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::Unavailable { agent, .. }
            | Self::Timeout { agent, .. }
            | Self::Capability { agent, .. } => agent,
        }
    }

    /// Short machine-readable cause
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "agent_unavailable",
            Self::Timeout { .. } => "agent_timeout",
            Self::Capability { .. } => "agent_capability_error",
        }
    }

    pub fn to_degraded(&self) -> DegradedAgent {
        DegradedAgent {
            agent: self.agent().to_string(),
            kind: self.kind().to_string(),
            reason: self.to_string(),
        }
    }
}

/// Hard failures of a coordination run
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The primary agent failed, which no strategy can recover from
    #[error("Primary agent {agent} failed during {step}: {source}")]
    PrimaryFailed {
        agent: String,
        step: String,
        #[source]
        source: AgentError,
    },

    /// Every participating agent failed
    #[error("All agents failed: {}", summarize(.failures))]
    AllAgentsFailed { failures: Vec<DegradedAgent> },

    /// Request rejected before any agent was called
    #[error("Invalid coordination request: {0}")]
    InvalidRequest(String),

    /// The run was cancelled before it finished
    #[error("Coordination run was cancelled")]
    Cancelled,
}

impl CoordinationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrimaryFailed { .. } => "primary_failed",
            Self::AllAgentsFailed { .. } => "all_agents_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }

    /// The agent a hard failure is attributed to, if there is a single one
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::PrimaryFailed { agent, .. } => Some(agent),
            _ => None,
        }
    }
}

impl From<conclave_core::Error> for CoordinationError {
    fn from(err: conclave_core::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

fn summarize(failures: &[DegradedAgent]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.agent, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the job manager
#[derive(Debug, Error)]
pub enum JobError {
    /// Unknown job, or a terminal job past its ttl
    #[error("Job not found: {job_id}")]
    NotFound { job_id: Uuid },

    /// The job has not reached a terminal state yet
    #[error("Job {job_id} is not ready (status: {})", .status.as_str())]
    NotReady { job_id: Uuid, status: JobStatus },

    /// The shared job store could not be reached; retry later
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),
}

impl From<conclave_core::Error> for JobError {
    fn from(err: conclave_core::Error) -> Self {
        match err {
            conclave_core::Error::InvalidInput(message) => Self::InvalidRequest(message),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

/// Errors from the streaming gateway
#[derive(Debug, Error)]
pub enum StreamError {
    /// The subscriber went away and no partial result was available
    #[error("Transport disconnected after {attempts} reconnect attempt(s)")]
    TransportDisconnected { attempts: u32 },

    #[error("Invalid stream request: {0}")]
    InvalidRequest(String),
}

/// A request was refused by the rate limiter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit of {limit} per {window_secs}s exceeded for {endpoint}; retry after {retry_after_secs}s")]
pub struct RateLimited {
    pub endpoint: String,
    pub limit: u64,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}
