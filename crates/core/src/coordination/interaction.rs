//! Interaction records: one audit entry per agent invocation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentResponse;

/// Sender name used when the coordinator invokes an agent on the user's behalf
pub const USER_SENDER: &str = "user";

/// Prompt material attached to an interaction, as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    /// The response came from the response cache, not from the agent
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// Audit entry for one agent invocation within a coordination run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: InteractionMetadata,
}

impl InteractionRecord {
    /// Build a record from a completed invocation. Prompt material is read from
    /// the response metadata when the agent reports it.
    pub fn from_response(
        from_agent: impl Into<String>,
        query: impl Into<String>,
        response: &AgentResponse,
    ) -> Self {
        let query = query.into();
        let metadata = InteractionMetadata {
            system_context: response.metadata_str("system_context").map(str::to_string),
            system_prompt: response.metadata_str("system_prompt").map(str::to_string),
            rag_context: response.metadata_str("rag_context").map(str::to_string),
            user_prompt: Some(
                response
                    .metadata_str("user_prompt")
                    .map(str::to_string)
                    .unwrap_or_else(|| query.clone()),
            ),
            ..InteractionMetadata::default()
        };

        Self {
            from_agent: from_agent.into(),
            to_agent: response.agent_name.clone(),
            query,
            response: response.content.clone(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.metadata.cached = cached;
        self
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.metadata.round = Some(round);
        self
    }

    pub fn at_step(mut self, step: impl Into<String>) -> Self {
        self.metadata.step = Some(step.into());
        self
    }

    /// Traffic that does not target the primary agent stays off the visible channel
    pub fn is_internal(&self, primary_agent: &str) -> bool {
        self.to_agent != primary_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_taken_from_response() {
        let response = AgentResponse::new("ux", "wireframes")
            .with_metadata("system_prompt", serde_json::json!("You are a designer"))
            .with_metadata("rag_context", serde_json::json!("persona notes"));

        let record = InteractionRecord::from_response("pm", "sketch the flow", &response);
        assert_eq!(record.to_agent, "ux");
        assert_eq!(record.metadata.system_prompt.as_deref(), Some("You are a designer"));
        assert_eq!(record.metadata.rag_context.as_deref(), Some("persona notes"));
        assert_eq!(record.metadata.user_prompt.as_deref(), Some("sketch the flow"));
        assert!(!record.metadata.cached);
    }

    #[test]
    fn test_internal_flag() {
        let response = AgentResponse::new("ux", "ok");
        let record = InteractionRecord::from_response("pm", "q", &response);
        assert!(record.is_internal("pm"));
        assert!(!record.is_internal("ux"));
    }
}
