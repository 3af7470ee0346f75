//! Wiring of the engine components around one shared store

use std::sync::Arc;

use conclave_core::store::KvStore;

use crate::agent::AgentRegistry;
use crate::cache::ResponseCache;
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::gateway::StreamingGateway;
use crate::job::JobManager;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct Engine {
    pub coordinator: Arc<Coordinator>,
    pub jobs: JobManager,
    pub gateway: StreamingGateway,
    pub cache: ResponseCache,
    pub rate_limiter: RateLimiter,
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn KvStore>, registry: AgentRegistry, config: EngineConfig) -> Self {
        let cache = ResponseCache::new(store.clone(), &config.cache);
        let coordinator = Arc::new(
            Coordinator::new(Arc::new(registry), config.coordinator.clone())
                .with_cache(cache.clone()),
        );
        let jobs = JobManager::new(store.clone(), coordinator.clone(), config.jobs.clone());
        let gateway = StreamingGateway::new(
            coordinator.clone(),
            store.clone(),
            config.jobs.ttl,
            config.reconnect.clone(),
        );
        let rate_limiter = RateLimiter::new(store, &config.rate_limit);

        Self {
            coordinator,
            jobs,
            gateway,
            cache,
            rate_limiter,
            config,
        }
    }
}
