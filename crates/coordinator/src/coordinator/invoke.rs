//! Per-run state and the single agent call step every strategy goes through

use std::sync::atomic::{AtomicU32, Ordering};

use conclave_core::agent::{AgentMessage, AgentResponse, ContextMap};
use conclave_core::coordination::{
    CoordinationOutcome, CoordinationRequest, DegradedAgent, InteractionRecord,
};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::events::CoordinationEvent;
use super::{Coordinator, RunControl};
use crate::cache::ResponseCache;
use crate::error::{AgentError, CoordinationError, Result};

/// Progress stays below this until the run has produced its result
const PROGRESS_CEILING: f32 = 0.95;
const CHUNK_BUFFER: usize = 64;

/// One agent invocation within a run
pub(crate) struct Step<'a> {
    pub agent: &'a str,
    pub from: &'a str,
    pub query: &'a str,
    pub messages: Vec<AgentMessage>,
    pub context: &'a ContextMap,
    pub round: Option<u32>,
    pub step: Option<&'static str>,
}

impl<'a> Step<'a> {
    pub fn new(
        agent: &'a str,
        from: &'a str,
        query: &'a str,
        messages: Vec<AgentMessage>,
        context: &'a ContextMap,
    ) -> Self {
        Self {
            agent,
            from,
            query,
            messages,
            context,
            round: None,
            step: None,
        }
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn at_step(mut self, step: &'static str) -> Self {
        self.step = Some(step);
        self
    }
}

/// Shared state of one coordination run
pub(crate) struct RunContext<'a> {
    pub coordinator: &'a Coordinator,
    pub request: &'a CoordinationRequest,
    control: &'a RunControl,
    records: Mutex<Vec<InteractionRecord>>,
    degraded: Mutex<Vec<DegradedAgent>>,
    completed: AtomicU32,
    expected: AtomicU32,
}

impl<'a> RunContext<'a> {
    pub fn new(
        coordinator: &'a Coordinator,
        request: &'a CoordinationRequest,
        control: &'a RunControl,
    ) -> Self {
        Self {
            coordinator,
            request,
            control,
            records: Mutex::new(Vec::new()),
            degraded: Mutex::new(Vec::new()),
            completed: AtomicU32::new(0),
            expected: AtomicU32::new(0),
        }
    }

    /// Fail with `Cancelled` if the run has been cancelled. Checked before
    /// every step that has not started yet.
    pub fn ensure_active(&self) -> Result<()> {
        if self.control.cancel.is_cancelled() {
            return Err(CoordinationError::Cancelled);
        }
        Ok(())
    }

    /// Announce `steps` more agent calls for progress reporting
    pub fn expect(&self, steps: u32) {
        self.expected.fetch_add(steps, Ordering::Relaxed);
    }

    pub async fn emit(&self, event: CoordinationEvent) {
        if let Some(tx) = &self.control.events {
            if tx.send(event).await.is_err() {
                debug!("Coordination event receiver dropped");
            }
        }
    }

    /// Record a non-fatal agent failure, once per agent
    pub async fn degrade(&self, err: &AgentError) {
        warn!("Agent {} degraded: {}", err.agent(), err);
        let mut degraded = self.degraded.lock().await;
        if !degraded.iter().any(|d| d.agent == err.agent()) {
            degraded.push(err.to_degraded());
        }
    }

    pub async fn degraded(&self) -> Vec<DegradedAgent> {
        self.degraded.lock().await.clone()
    }

    /// Invoke one agent: cache lookup, timed call with chunk forwarding,
    /// cache write-back, then the interaction record
    pub async fn call(&self, step: Step<'_>) -> std::result::Result<AgentResponse, AgentError> {
        let result = self.dispatch(&step).await;
        if let Err(err) = &result {
            self.emit(CoordinationEvent::AgentFailed { error: err.clone() })
                .await;
        }
        self.step_finished(step.agent).await;
        result
    }

    async fn dispatch(&self, step: &Step<'_>) -> std::result::Result<AgentResponse, AgentError> {
        let agent = self.coordinator.registry.get(step.agent)?;
        self.emit(CoordinationEvent::AgentStarted {
            agent: step.agent.to_string(),
        })
        .await;

        let cache = self.coordinator.cache.as_ref().filter(|c| c.is_enabled());
        let cache_key =
            cache.map(|_| ResponseCache::key_for(step.agent, &step.messages, step.context));

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            if let Some(mut hit) = cache.get(key).await {
                debug!("Cache hit for agent {}", step.agent);
                hit.agent_name = step.agent.to_string();
                if !hit.content.is_empty() {
                    self.emit(CoordinationEvent::Chunk {
                        agent: step.agent.to_string(),
                        chunk: hit.content.clone(),
                    })
                    .await;
                }
                self.complete(step, &hit, true).await;
                return Ok(hit);
            }
        }

        let timeout = self.coordinator.config.agent_timeout;
        let (tx, mut rx) = mpsc::channel::<String>(CHUNK_BUFFER);
        let invocation = tokio::time::timeout(
            timeout,
            agent.invoke_streaming(&step.messages, step.context, tx),
        );
        let forward = async {
            while let Some(chunk) = rx.recv().await {
                self.emit(CoordinationEvent::Chunk {
                    agent: step.agent.to_string(),
                    chunk,
                })
                .await;
            }
        };
        let (outcome, ()) = tokio::join!(invocation, forward);

        let mut response = outcome.map_err(|_| AgentError::timeout(step.agent, timeout))??;
        response.agent_name = step.agent.to_string();

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            cache.set(key, &response).await;
        }
        self.complete(step, &response, false).await;
        Ok(response)
    }

    async fn complete(&self, step: &Step<'_>, response: &AgentResponse, cached: bool) {
        self.emit(CoordinationEvent::AgentCompleted {
            response: response.clone(),
        })
        .await;

        let mut record =
            InteractionRecord::from_response(step.from, step.query, response).cached(cached);
        if let Some(round) = step.round {
            record = record.in_round(round);
        }
        if let Some(name) = step.step {
            record = record.at_step(name);
        }
        self.records.lock().await.push(record.clone());
        self.emit(CoordinationEvent::Interaction { record }).await;
    }

    async fn step_finished(&self, agent: &str) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let expected = self.expected.load(Ordering::Relaxed).max(completed + 1);
        let progress = (completed as f32 / expected as f32).min(PROGRESS_CEILING);
        self.emit(CoordinationEvent::Progress {
            progress,
            message: format!("{} finished", agent),
        })
        .await;
    }

    /// Close the run: attach run metadata to the response and hand over the trail
    pub async fn finish(&self, response: AgentResponse) -> CoordinationOutcome {
        let degraded = self.degraded().await;
        let interactions = std::mem::take(&mut *self.records.lock().await);
        let response = response
            .with_metadata(
                "coordination_mode",
                json!(self.request.coordination_mode.as_str()),
            )
            .with_metadata("partial_failure", json!(!degraded.is_empty()));

        self.emit(CoordinationEvent::Progress {
            progress: 1.0,
            message: "coordination complete".to_string(),
        })
        .await;

        CoordinationOutcome {
            response,
            interactions,
            degraded,
        }
    }
}
