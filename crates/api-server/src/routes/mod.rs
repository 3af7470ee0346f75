//! Route handlers

pub mod cache;
pub mod coordinate;
pub mod health;
pub mod jobs;
pub mod streams;

use axum::Router;

use crate::state::AppState;

/// Every route, before state and middleware are applied
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(coordinate::router())
        .merge(streams::router())
        .merge(cache::router())
}
