//! Messages exchanged with agents

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the tool call a primary agent uses to ask a supporting agent
pub const CONSULT_TOOL: &str = "consult";

/// Request context handed to every agent. Ordered so that hashing is stable.
pub type ContextMap = BTreeMap<String, Value>;

/// Message role in an agent conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

/// A single immutable message in an agent's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// A tool call requested by an agent in its response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A consultation requested by the primary agent in collaborative mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultRequest {
    pub agent: String,
    pub query: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a `consult` tool call addressed to `agent`
    pub fn consult(agent: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(
            CONSULT_TOOL,
            serde_json::json!({ "agent": agent.into(), "query": query.into() }),
        )
    }

    /// Interpret this call as a consultation, if it is one and is well formed
    pub fn as_consult(&self) -> Option<ConsultRequest> {
        if self.name != CONSULT_TOOL {
            return None;
        }
        let agent = self.arguments.get("agent")?.as_str()?.trim();
        let query = self.arguments.get("query")?.as_str()?.trim();
        if agent.is_empty() || query.is_empty() {
            return None;
        }
        Some(ConsultRequest {
            agent: agent.to_string(),
            query: query.to_string(),
        })
    }
}

/// The answer produced by one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub agent_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl AgentResponse {
    pub fn new(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent_name: agent_name.into(),
            metadata: BTreeMap::new(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// Consultations requested by this response, in the order they were issued
    pub fn consult_requests(&self) -> Vec<ConsultRequest> {
        self.tool_calls.iter().filter_map(ToolCall::as_consult).collect()
    }

    /// String-valued metadata lookup
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}
