//! Event types for streamed coordination runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentResponse;
use crate::coordination::{
    CoordinationMode, CoordinationOutcome, DegradedAgent, InteractionMetadata, InteractionRecord,
};

/// Stream event with its emission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

/// One variant per event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    /// The run has been accepted and is starting
    Start {
        stream_id: Uuid,
        primary_agent: String,
        mode: CoordinationMode,
        agents: Vec<String>,
    },
    AgentStart {
        agent: String,
    },
    AgentChunk {
        agent: String,
        chunk: String,
    },
    AgentComplete {
        agent: String,
        response: AgentResponse,
    },
    Interaction {
        from_agent: String,
        to_agent: String,
        query: String,
        response: String,
        metadata: InteractionMetadata,
        internal: bool,
    },
    Progress {
        progress: f32,
        message: String,
    },
    Error {
        kind: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    Complete {
        response: AgentResponse,
        interactions: Vec<InteractionRecord>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<DegradedAgent>,
    },
}

impl StreamEvent {
    pub fn new(payload: StreamPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn start(
        stream_id: Uuid,
        primary_agent: impl Into<String>,
        mode: CoordinationMode,
        agents: Vec<String>,
    ) -> Self {
        Self::new(StreamPayload::Start {
            stream_id,
            primary_agent: primary_agent.into(),
            mode,
            agents,
        })
    }

    pub fn agent_start(agent: impl Into<String>) -> Self {
        Self::new(StreamPayload::AgentStart {
            agent: agent.into(),
        })
    }

    pub fn agent_chunk(agent: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self::new(StreamPayload::AgentChunk {
            agent: agent.into(),
            chunk: chunk.into(),
        })
    }

    pub fn agent_complete(response: AgentResponse) -> Self {
        Self::new(StreamPayload::AgentComplete {
            agent: response.agent_name.clone(),
            response,
        })
    }

    pub fn interaction(record: &InteractionRecord, internal: bool) -> Self {
        Self::new(StreamPayload::Interaction {
            from_agent: record.from_agent.clone(),
            to_agent: record.to_agent.clone(),
            query: record.query.clone(),
            response: record.response.clone(),
            metadata: record.metadata.clone(),
            internal,
        })
    }

    pub fn progress(progress: f32, message: impl Into<String>) -> Self {
        Self::new(StreamPayload::Progress {
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        })
    }

    pub fn error(kind: impl Into<String>, error: impl Into<String>, agent: Option<String>) -> Self {
        Self::new(StreamPayload::Error {
            kind: kind.into(),
            error: error.into(),
            agent,
        })
    }

    pub fn complete(outcome: CoordinationOutcome) -> Self {
        Self::new(StreamPayload::Complete {
            response: outcome.response,
            interactions: outcome.interactions,
            degraded: outcome.degraded,
        })
    }

    /// Wire name of the event type
    pub fn type_name(&self) -> &'static str {
        match &self.payload {
            StreamPayload::Start { .. } => "start",
            StreamPayload::AgentStart { .. } => "agent_start",
            StreamPayload::AgentChunk { .. } => "agent_chunk",
            StreamPayload::AgentComplete { .. } => "agent_complete",
            StreamPayload::Interaction { .. } => "interaction",
            StreamPayload::Progress { .. } => "progress",
            StreamPayload::Error { .. } => "error",
            StreamPayload::Complete { .. } => "complete",
        }
    }

    /// The agent an agent-scoped event belongs to
    pub fn agent(&self) -> Option<&str> {
        match &self.payload {
            StreamPayload::AgentStart { agent }
            | StreamPayload::AgentChunk { agent, .. }
            | StreamPayload::AgentComplete { agent, .. } => Some(agent),
            StreamPayload::Error { agent, .. } => agent.as_deref(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamPayload::Complete { .. } | StreamPayload::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = StreamEvent::agent_chunk("pm", "Hel");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_chunk");
        assert_eq!(json["agent"], "pm");
        assert_eq!(json["chunk"], "Hel");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_deserialization() {
        let json = r#"{"type":"progress","progress":0.5,"message":"round 1","timestamp":"2026-01-01T00:00:00Z"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event.payload {
            StreamPayload::Progress { progress, ref message } => {
                assert_eq!(progress, 0.5);
                assert_eq!(message, "round 1");
            }
            _ => panic!("Expected Progress event"),
        }
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_interaction_carries_internal_flag() {
        let response = AgentResponse::new("ux", "mockups");
        let record = InteractionRecord::from_response("pm", "design it", &response);
        let event = StreamEvent::interaction(&record, true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "interaction");
        assert_eq!(json["internal"], true);
        assert_eq!(json["to_agent"], "ux");
        assert_eq!(event.agent(), None);
    }
}
