//! Caller identity used as the rate-limit key

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::state::AppState;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
const ANONYMOUS: &str = "anonymous";

/// The `x-client-id` header, else the peer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let identity = from_header
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| ANONYMOUS.to_string());

        Ok(Self(identity))
    }
}

/// Count one request against `endpoint` for this caller
pub async fn check_rate(
    state: &AppState,
    identity: &ClientIdentity,
    endpoint: &str,
) -> Result<(), ApiError> {
    state
        .engine()
        .rate_limiter
        .check(identity.as_str(), endpoint)
        .await
        .map_err(ApiError::from)
}
