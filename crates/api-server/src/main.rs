//! API Server for the Conclave coordination engine
//!
//! Serves the job, synchronous, streaming (SSE and WebSocket) and cache
//! endpoints over one shared store.

mod config;
mod error;
mod gateway;
mod identity;
mod routes;
mod state;

use std::net::SocketAddr;

use agent_coordinator::EngineConfig;
use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,agent_coordinator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();
    tracing::info!("Using data directory: {:?}", config.data_dir);
    tracing::debug!("Engine configuration: {:?}", engine_config);

    let port = config.port;
    let app_state = AppState::new(config, engine_config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!(
        "Coordinator worker {} ready",
        app_state.engine().jobs.worker_id()
    );

    let app = routes::router()
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Bind to 0.0.0.0 for localhost/127.0.0.1 compatibility
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("REST API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
