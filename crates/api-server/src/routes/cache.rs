//! Response cache counters

use agent_coordinator::CacheStats;
use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.engine().cache.stats())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/cache/stats", get(cache_stats))
}
