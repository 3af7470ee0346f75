//! Application state

use std::sync::Arc;

use agent_coordinator::{AgentRegistry, Engine, EngineConfig};
use conclave_core::store::{FileKvStore, KvStore, MemoryKvStore};
use tracing::{info, warn};

use crate::config::{ServerConfig, StoreKind};
use crate::gateway::ResumeRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: Engine,
    config: ServerConfig,
    resumes: ResumeRegistry,
}

impl AppState {
    /// Open the shared store, load the agent registry and wire the engine
    pub async fn new(config: ServerConfig, engine_config: EngineConfig) -> conclave_core::Result<Self> {
        let store: Arc<dyn KvStore> = match config.store {
            StoreKind::File => Arc::new(FileKvStore::new(config.store_dir()).await?),
            StoreKind::Memory => Arc::new(MemoryKvStore::new()),
        };

        let registry = if config.agents_file.exists() {
            AgentRegistry::from_file(&config.agents_file)?
        } else {
            warn!(
                "Agents file {:?} not found, starting with no agents",
                config.agents_file
            );
            AgentRegistry::new()
        };
        info!(
            "Loaded {} agent(s) using the {} store",
            registry.len(),
            store.name()
        );

        Ok(Self::with_engine(
            Engine::new(store, registry, engine_config),
            config,
        ))
    }

    pub fn with_engine(engine: Engine, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                engine,
                config,
                resumes: ResumeRegistry::new(),
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Duplex streams that a reconnecting subscriber can resume
    pub fn resumes(&self) -> &ResumeRegistry {
        &self.inner.resumes
    }
}
