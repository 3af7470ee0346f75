//! Agent abstraction and registry

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::agent::{AgentMessage, AgentResponse, ContextMap};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::RemoteAgent;
use crate::error::AgentError;

/// Something that can answer a message history
///
/// Agents are opaque to the coordinator: they receive the history plus the
/// request context and return a response, optionally with tool calls.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
    ) -> Result<AgentResponse, AgentError>;

    /// Invoke while forwarding partial output. The default implementation
    /// delivers the whole answer as a single chunk.
    async fn invoke_streaming(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
        chunks: mpsc::Sender<String>,
    ) -> Result<AgentResponse, AgentError> {
        let response = self.invoke(messages, context).await?;
        if !response.content.is_empty() {
            let _ = chunks.send(response.content.clone()).await;
        }
        Ok(response)
    }
}

/// Agent lookup by name
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<RemoteAgentSpec>,
}

#[derive(Debug, Deserialize)]
struct RemoteAgentSpec {
    name: String,
    url: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own name, replacing any previous one
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_some() {
            warn!("Agent {} registered twice; keeping the latest", name);
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Resolve an agent, failing with `Unavailable` for unknown names
    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>, AgentError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::unavailable(name, "agent is not registered"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered agent names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Load remote agents from a JSON file of the form
    /// `{"agents": [{"name": "...", "url": "...", "timeout_secs": 30}]}`
    pub fn from_file(path: &Path) -> conclave_core::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> conclave_core::Result<Self> {
        let file: AgentsFile = serde_json::from_str(raw)?;
        let mut registry = Self::new();
        for spec in file.agents {
            let name = spec.name.trim();
            if name.is_empty() {
                return Err(conclave_core::Error::InvalidInput(
                    "agent name must not be empty".to_string(),
                ));
            }
            let mut agent = RemoteAgent::new(name, spec.url.trim_end_matches('/'));
            if let Some(secs) = spec.timeout_secs {
                agent = agent.with_request_timeout(Duration::from_secs(secs));
            }
            registry.register(Arc::new(agent));
        }
        info!("Loaded {} remote agent(s)", registry.len());
        Ok(registry)
    }
}
