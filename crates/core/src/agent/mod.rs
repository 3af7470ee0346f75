//! Agent-facing message types

mod message;

pub use message::{
    AgentMessage, AgentResponse, ConsultRequest, ContextMap, MessageRole, ToolCall, CONSULT_TOOL,
};
