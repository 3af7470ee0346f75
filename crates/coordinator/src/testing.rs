//! In-process agents for exercising coordination without a network

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::agent::{AgentMessage, AgentResponse, ContextMap};
use tokio::sync::{mpsc, Mutex};

use crate::agent::{Agent, AgentRegistry};
use crate::error::AgentError;

type Handler = dyn Fn(&[AgentMessage], &ContextMap) -> Result<AgentResponse, AgentError> + Send + Sync;

/// Agent whose answers are computed by a closure, optionally after a delay
pub struct ScriptedAgent {
    name: String,
    handler: Arc<Handler>,
    delay: Option<Duration>,
    chunk_size: Option<usize>,
    calls: Mutex<Vec<Vec<AgentMessage>>>,
}

impl ScriptedAgent {
    /// Always answer with `reply`
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        let name = name.into();
        let reply = reply.into();
        let agent = name.clone();
        Self::with_handler(name, move |_, _| Ok(AgentResponse::new(&agent, reply.clone())))
    }

    pub fn with_handler<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[AgentMessage], &ContextMap) -> Result<AgentResponse, AgentError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            delay: None,
            chunk_size: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `err`
    pub fn failing(name: impl Into<String>, err: AgentError) -> Self {
        Self::with_handler(name, move |_, _| Err(err.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stream the answer in chunks of `size` characters
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Message histories this agent has been invoked with
    pub async fn calls(&self) -> Vec<Vec<AgentMessage>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
    ) -> Result<AgentResponse, AgentError> {
        self.calls.lock().await.push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(messages, context)
    }

    async fn invoke_streaming(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
        chunks: mpsc::Sender<String>,
    ) -> Result<AgentResponse, AgentError> {
        let response = self.invoke(messages, context).await?;
        match self.chunk_size {
            Some(size) => {
                let chars: Vec<char> = response.content.chars().collect();
                for piece in chars.chunks(size) {
                    let _ = chunks.send(piece.iter().collect()).await;
                }
            }
            None if !response.content.is_empty() => {
                let _ = chunks.send(response.content.clone()).await;
            }
            None => {}
        }
        Ok(response)
    }
}

/// Registry holding the given agents
pub fn registry(agents: Vec<Arc<ScriptedAgent>>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    registry
}
