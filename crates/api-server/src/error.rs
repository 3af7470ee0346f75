//! Mapping of engine errors onto HTTP responses

use agent_coordinator::{CoordinationError, JobError, RateLimited, StreamError};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error(transparent)]
    Store(#[from] conclave_core::Error),

    /// The synchronous path ran past its bound
    #[error("Coordination did not finish within {0}s")]
    Timeout(u64),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Job(JobError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Job(JobError::NotReady { .. }) => StatusCode::CONFLICT,
            Self::Job(JobError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Job(JobError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Coordination(CoordinationError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Coordination(CoordinationError::Cancelled) => StatusCode::CONFLICT,
            Self::Coordination(_) => StatusCode::BAD_GATEWAY,
            Self::Stream(StreamError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Stream(StreamError::TransportDisconnected { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job(JobError::NotFound { .. }) => "job_not_found",
            Self::Job(JobError::NotReady { .. }) => "job_not_ready",
            Self::Job(JobError::StoreUnavailable(_)) => "job_store_unavailable",
            Self::Job(JobError::InvalidRequest(_)) => "invalid_request",
            Self::Coordination(e) => e.kind(),
            Self::Stream(StreamError::InvalidRequest(_)) => "invalid_request",
            Self::Stream(StreamError::TransportDisconnected { .. }) => "transport_disconnected",
            Self::RateLimited(_) => "rate_limited",
            Self::Store(_) => "store_error",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        } else {
            debug!("Request rejected with {}: {}", status, self);
        }

        let agent = match &self {
            Self::Coordination(e) => e.agent().map(str::to_string),
            _ => None,
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
            agent,
        });

        match self {
            Self::RateLimited(limited) => (
                status,
                [(header::RETRY_AFTER, limited.retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use agent_coordinator::AgentError;
    use axum::body::to_bytes;
    use conclave_core::job::JobStatus;
    use uuid::Uuid;

    async fn body_of(response: Response) -> ErrorResponse {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = ApiError::from(RateLimited {
            endpoint: "submit".to_string(),
            limit: 5,
            window_secs: 60,
            retry_after_secs: 12,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert_eq!(body_of(response).await.kind, "rate_limited");
    }

    #[tokio::test]
    async fn test_primary_failure_names_agent() {
        let err = CoordinationError::PrimaryFailed {
            agent: "pm".to_string(),
            step: "sequential".to_string(),
            source: AgentError::unavailable("pm", "connection refused"),
        };
        let response = ApiError::from(err).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_of(response).await;
        assert_eq!(body.kind, "primary_failed");
        assert_eq!(body.agent.as_deref(), Some("pm"));
    }

    #[test]
    fn test_job_error_statuses() {
        let job_id = Uuid::new_v4();
        assert_eq!(
            ApiError::from(JobError::NotFound { job_id }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(JobError::NotReady {
                job_id,
                status: JobStatus::Processing
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(JobError::StoreUnavailable("down".to_string())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::Timeout(60).status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
