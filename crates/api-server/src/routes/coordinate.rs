//! Synchronous coordination endpoint

use agent_coordinator::ENDPOINT_COORDINATE;
use axum::{extract::State, routing::post, Json, Router};
use conclave_core::coordination::{CoordinationOutcome, CoordinationRequest};
use tracing::warn;

use crate::error::ApiError;
use crate::identity::{check_rate, ClientIdentity};
use crate::state::AppState;

/// Run a request to completion within the sync timeout. Dropping the run on
/// overrun stops it; callers with longer work should submit a job.
async fn coordinate(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(request): Json<CoordinationRequest>,
) -> Result<Json<CoordinationOutcome>, ApiError> {
    check_rate(&state, &identity, ENDPOINT_COORDINATE).await?;

    let engine = state.engine();
    let limit = engine.config.sync_timeout;
    match tokio::time::timeout(limit, engine.coordinator.coordinate(&request)).await {
        Ok(outcome) => Ok(Json(outcome?)),
        Err(_) => {
            warn!(
                "Synchronous coordination for {} exceeded {:?}",
                request.primary_agent, limit
            );
            Err(ApiError::Timeout(limit.as_secs()))
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/coordinate", post(coordinate))
}
