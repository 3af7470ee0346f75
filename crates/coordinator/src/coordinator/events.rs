//! Events published while a coordination run is in flight

use conclave_core::agent::AgentResponse;
use conclave_core::coordination::InteractionRecord;

use crate::error::AgentError;

/// Producer side of the run event contract. The streaming gateway and the job
/// progress tracker consume these; the coordinator never waits on a consumer
/// that has gone away.
#[derive(Debug, Clone)]
pub enum CoordinationEvent {
    AgentStarted {
        agent: String,
    },
    Chunk {
        agent: String,
        chunk: String,
    },
    AgentCompleted {
        response: AgentResponse,
    },
    AgentFailed {
        error: AgentError,
    },
    Interaction {
        record: InteractionRecord,
    },
    Progress {
        progress: f32,
        message: String,
    },
}

impl CoordinationEvent {
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentStarted { agent } | Self::Chunk { agent, .. } => Some(agent),
            Self::AgentCompleted { response } => Some(&response.agent_name),
            Self::AgentFailed { error } => Some(error.agent()),
            Self::Interaction { record } => Some(&record.to_agent),
            Self::Progress { .. } => None,
        }
    }
}
