//! Multi-agent coordinator
//!
//! Runs one [`CoordinationRequest`] through the strategy its mode names and
//! returns the synthesized response together with the interaction trail.

mod collaborative;
mod debate;
mod events;
mod invoke;
mod parallel;
mod sequential;
mod synthesis;

use std::sync::Arc;

use conclave_core::coordination::{CoordinationMode, CoordinationOutcome, CoordinationRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentRegistry;
use crate::cache::ResponseCache;
use crate::config::CoordinatorConfig;
use crate::error::Result;

pub use events::CoordinationEvent;
pub use synthesis::COORDINATOR_SENDER;

use invoke::RunContext;

/// Capacity of the event channel consumers should create
pub const EVENT_BUFFER: usize = 256;

/// Hooks a caller attaches to one run
#[derive(Clone, Default)]
pub struct RunControl {
    pub events: Option<mpsc::Sender<CoordinationEvent>>,
    pub cancel: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: mpsc::Sender<CoordinationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    cache: Option<ResponseCache>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(registry: Arc<AgentRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub async fn coordinate(&self, request: &CoordinationRequest) -> Result<CoordinationOutcome> {
        self.coordinate_with(request, &RunControl::default()).await
    }

    /// Run a request, publishing events and honouring cancellation
    pub async fn coordinate_with(
        &self,
        request: &CoordinationRequest,
        control: &RunControl,
    ) -> Result<CoordinationOutcome> {
        request.validate()?;

        let mode = request.coordination_mode;
        info!(
            "Coordinating {} run: primary={}, agents={}",
            mode,
            request.primary_agent,
            request.agents().len()
        );

        let ctx = RunContext::new(self, request, control);
        let result = match mode {
            CoordinationMode::Sequential => sequential::run(&ctx).await,
            CoordinationMode::Parallel => parallel::run(&ctx).await,
            CoordinationMode::Collaborative => collaborative::run(&ctx).await,
            CoordinationMode::Debate => debate::run(&ctx).await,
        };

        match &result {
            Ok(outcome) if outcome.is_partial_failure() => warn!(
                "{} run finished with {} degraded agent(s)",
                mode,
                outcome.degraded.len()
            ),
            Ok(outcome) => info!(
                "{} run finished with {} interaction(s)",
                mode,
                outcome.interactions.len()
            ),
            Err(e) => warn!("{} run failed: {}", mode, e),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SynthesisMode;
    use crate::testing::{registry, ScriptedAgent};

    pub(crate) fn coordinator(agents: Vec<Arc<ScriptedAgent>>) -> Coordinator {
        Coordinator::new(Arc::new(registry(agents)), CoordinatorConfig::default())
    }

    pub(crate) fn coordinator_with(
        agents: Vec<Arc<ScriptedAgent>>,
        config: CoordinatorConfig,
    ) -> Coordinator {
        Coordinator::new(Arc::new(registry(agents)), config)
    }

    #[tokio::test]
    async fn test_rejects_invalid_request() {
        let coordinator = coordinator(vec![Arc::new(ScriptedAgent::new("pm", "ok"))]);
        let err = coordinator
            .coordinate(&CoordinationRequest::new("  ", "pm"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pm = Arc::new(ScriptedAgent::new("pm", "ok"));
        let coordinator = coordinator(vec![pm.clone()]);
        let control = RunControl::new();
        control.cancel.cancel();

        let err = coordinator
            .coordinate_with(&CoordinationRequest::new("q", "pm"), &control)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::CoordinationError::Cancelled));
        assert_eq!(pm.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let coordinator = coordinator(vec![Arc::new(ScriptedAgent::new("pm", "hello").chunked(2))]);
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let control = RunControl::new().with_events(tx);

        coordinator
            .coordinate_with(&CoordinationRequest::new("q", "pm"), &control)
            .await
            .unwrap();
        drop(control);

        let mut chunks = String::new();
        let mut saw_interaction = false;
        let mut last_progress = 0.0;
        while let Some(event) = rx.recv().await {
            match event {
                CoordinationEvent::Chunk { chunk, .. } => chunks.push_str(&chunk),
                CoordinationEvent::Interaction { .. } => saw_interaction = true,
                CoordinationEvent::Progress { progress, .. } => {
                    assert!(progress >= last_progress);
                    last_progress = progress;
                }
                _ => {}
            }
        }
        assert_eq!(chunks, "hello");
        assert!(saw_interaction);
        assert_eq!(last_progress, 1.0);
    }

    #[tokio::test]
    async fn test_cache_hit_is_recorded() {
        use conclave_core::store::MemoryKvStore;

        let pm = Arc::new(ScriptedAgent::new("pm", "expensive answer"));
        let cache = ResponseCache::new(
            Arc::new(MemoryKvStore::new()),
            &crate::config::CacheConfig::default(),
        );
        let coordinator = coordinator_with(
            vec![pm.clone()],
            CoordinatorConfig {
                synthesis: SynthesisMode::Deterministic,
                ..CoordinatorConfig::default()
            },
        )
        .with_cache(cache.clone());

        let request = CoordinationRequest::new("q", "pm");
        let first = coordinator.coordinate(&request).await.unwrap();
        let second = coordinator.coordinate(&request).await.unwrap();

        assert_eq!(pm.call_count().await, 1);
        assert!(!first.interactions[0].metadata.cached);
        assert!(second.interactions[0].metadata.cached);
        assert_eq!(second.response.content, "expensive answer");
        assert_eq!(cache.stats().hits, 1);
    }
}
