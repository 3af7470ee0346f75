//! Result of a coordination run

use serde::{Deserialize, Serialize};

use super::InteractionRecord;
use crate::agent::AgentResponse;

/// An agent that failed or timed out and was left out of the synthesized answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedAgent {
    pub agent: String,
    /// Short machine-readable cause, e.g. `timeout`, `unavailable`
    pub kind: String,
    pub reason: String,
}

/// Synthesized response plus the interaction audit trail of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationOutcome {
    pub response: AgentResponse,
    pub interactions: Vec<InteractionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedAgent>,
}

impl CoordinationOutcome {
    /// Some non-primary agents failed but a usable answer was produced
    pub fn is_partial_failure(&self) -> bool {
        !self.degraded.is_empty()
    }
}
