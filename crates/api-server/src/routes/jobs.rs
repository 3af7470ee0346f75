//! Job API endpoints
//!
//! Submit a coordination request as a background job, poll it, fetch its
//! result and cancel it.

use agent_coordinator::ENDPOINT_SUBMIT;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use conclave_core::coordination::CoordinationRequest;
use conclave_core::job::{JobResultView, JobStatus, JobStatusView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::{check_rate, ClientIdentity};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub status: JobStatus,
}

async fn submit_job(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(request): Json<CoordinationRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    check_rate(&state, &identity, ENDPOINT_SUBMIT).await?;
    let id = state.engine().jobs.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id,
            status: JobStatus::Pending,
        }),
    ))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    Ok(Json(state.engine().jobs.status(id).await?))
}

async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResultView>, ApiError> {
    Ok(Json(state.engine().jobs.result(id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine().jobs.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/api/jobs/{id}/result", get(get_job_result))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agent_coordinator::testing::ScriptedAgent;
    use agent_coordinator::{EngineConfig, RateLimitConfig};
    use axum::http::{header, StatusCode};
    use conclave_core::coordination::CoordinationRequest;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::routes::test_util::{empty_request, json_body, json_request};
    use crate::state::test_support::build_state;

    async fn submit(app: &axum::Router, client: &str, request: &CoordinationRequest) -> axum::response::Response {
        app.clone()
            .oneshot(json_request("POST", "/api/jobs", client, request))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_then_fetch_result() {
        let (state, _tmp) = build_state(
            vec![Arc::new(ScriptedAgent::new("pm", "launch plan"))],
            EngineConfig::default(),
        )
        .await;
        let app = super::router().with_state(state);

        let response = submit(&app, "client-a", &CoordinationRequest::new("Plan a launch", "pm")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "pending");
        let id = body["id"].as_str().unwrap().to_string();

        let mut result = None;
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(empty_request("GET", &format!("/api/jobs/{}/result", id)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                result = Some(json_body(response).await);
                break;
            }
            assert_eq!(response.status(), StatusCode::CONFLICT);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let result = result.expect("job should complete");
        assert_eq!(result["status"], "completed");
        assert_eq!(result["result"]["response"]["content"], "launch plan");

        let response = app
            .oneshot(empty_request("GET", &format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        let status = json_body(response).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["progress"], 1.0);
    }

    #[tokio::test]
    async fn result_of_running_job_is_not_ready() {
        let (state, _tmp) = build_state(
            vec![Arc::new(
                ScriptedAgent::new("pm", "slow").with_delay(Duration::from_secs(30)),
            )],
            EngineConfig::default(),
        )
        .await;
        let app = super::router().with_state(state);

        let body = json_body(submit(&app, "client-a", &CoordinationRequest::new("q", "pm")).await).await;
        let id = body["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(empty_request("GET", &format!("/api/jobs/{}/result", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "job_not_ready");
    }

    #[tokio::test]
    async fn cancel_removes_job() {
        let (state, _tmp) = build_state(
            vec![Arc::new(
                ScriptedAgent::new("pm", "slow").with_delay(Duration::from_secs(30)),
            )],
            EngineConfig::default(),
        )
        .await;
        let app = super::router().with_state(state);

        let body = json_body(submit(&app, "client-a", &CoordinationRequest::new("q", "pm")).await).await;
        let id = body["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", &format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(empty_request("GET", &format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(empty_request("DELETE", &format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (state, _tmp) = build_state(Vec::new(), EngineConfig::default()).await;
        let response = super::router()
            .with_state(state)
            .oneshot(empty_request("GET", &format!("/api/jobs/{}", Uuid::new_v4())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["kind"], "job_not_found");
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let (state, _tmp) = build_state(Vec::new(), EngineConfig::default()).await;
        let response = super::router()
            .with_state(state)
            .oneshot(json_request(
                "POST",
                "/api/jobs",
                "client-a",
                &CoordinationRequest::new("  ", "pm"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn submit_is_rate_limited_per_client() {
        let config = EngineConfig {
            rate_limit: RateLimitConfig {
                limit: 2,
                ..RateLimitConfig::default()
            },
            ..EngineConfig::default()
        };
        let (state, _tmp) = build_state(vec![Arc::new(ScriptedAgent::new("pm", "ok"))], config).await;
        let app = super::router().with_state(state);
        let request = CoordinationRequest::new("q", "pm");

        for _ in 0..2 {
            assert_eq!(submit(&app, "client-a", &request).await.status(), StatusCode::ACCEPTED);
        }
        let refused = submit(&app, "client-a", &request).await;
        assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = refused.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1);

        assert_eq!(submit(&app, "client-b", &request).await.status(), StatusCode::ACCEPTED);
    }
}
