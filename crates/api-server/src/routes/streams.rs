//! Streaming endpoints
//!
//! `POST /api/streams` runs a request as a one-shot server-sent event stream.
//! The duplex WebSocket variant lives in the gateway module.

use agent_coordinator::{ChannelTransport, NoReconnect, ENDPOINT_STREAM};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use conclave_core::coordination::CoordinationRequest;
use conclave_core::stream::StreamEvent;
use futures::stream::Stream;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::ws_handler;
use crate::identity::{check_rate, ClientIdentity};
use crate::state::AppState;

/// Events in flight between the gateway and the response body
const SSE_BUFFER: usize = 16;

async fn open_stream(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(request): Json<CoordinationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    check_rate(&state, &identity, ENDPOINT_STREAM).await?;

    let gateway = state.engine().gateway.clone();
    let session = gateway.open(request)?;
    let stream_id = session.stream_id;
    let (transport, rx) = ChannelTransport::channel(SSE_BUFFER);

    tokio::spawn(async move {
        let mut reconnector = NoReconnect;
        match gateway
            .deliver(session, Box::new(transport), &mut reconnector)
            .await
        {
            Ok(outcome) => debug!(
                "SSE stream {} delivered {} event(s)",
                stream_id, outcome.delivered
            ),
            Err(e) => warn!("SSE stream {} ended early: {}", stream_id, e),
        }
    });

    let events = ReceiverStream::new(rx).map(|event| to_sse(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StreamEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.type_name()).json_data(event)
}

async fn stream_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StreamEvent>>, ApiError> {
    state
        .engine()
        .gateway
        .audit_trail(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No audit trail for stream {}", id)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/streams", post(open_stream))
        .route("/api/streams/ws", get(ws_handler))
        .route("/api/streams/{id}/audit", get(stream_audit))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agent_coordinator::testing::ScriptedAgent;
    use agent_coordinator::EngineConfig;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use conclave_core::agent::{AgentResponse, ToolCall};
    use conclave_core::coordination::{CoordinationMode, CoordinationRequest};
    use tower::ServiceExt;

    use crate::routes::test_util::{empty_request, json_body, json_request};
    use crate::state::test_support::build_state;

    /// `(event, data)` pairs of an SSE body
    fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
        body.split("\n\n")
            .filter_map(|frame| {
                let mut name = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(value) = line.strip_prefix("event: ") {
                        name = Some(value.to_string());
                    } else if let Some(value) = line.strip_prefix("data: ") {
                        data = serde_json::from_str(value).ok();
                    }
                }
                Some((name?, data?))
            })
            .collect()
    }

    #[tokio::test]
    async fn collaborative_stream_hides_consultations() {
        let pm = ScriptedAgent::with_handler("pm", |messages, _| {
            if messages.iter().any(|m| m.content.starts_with("ux:")) {
                Ok(AgentResponse::new("pm", "plan with mockups"))
            } else {
                Ok(AgentResponse::new("pm", "need input")
                    .with_tool_call(ToolCall::consult("ux", "layout?"))
                    .with_tool_call(ToolCall::consult("eng", "effort?")))
            }
        });
        let (state, _tmp) = build_state(
            vec![
                Arc::new(pm),
                Arc::new(ScriptedAgent::new("ux", "mockups")),
                Arc::new(ScriptedAgent::new("eng", "two weeks")),
            ],
            EngineConfig::default(),
        )
        .await;
        let app = super::router().with_state(state);

        let request = CoordinationRequest::new("Plan a launch", "pm")
            .with_mode(CoordinationMode::Collaborative)
            .with_supporting(["ux", "eng"]);
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/streams", "client-a", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let events = parse_sse(&String::from_utf8(body.to_vec()).unwrap());
        let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names.first(), Some(&"start"));
        assert_eq!(names.last(), Some(&"complete"));
        assert!(events
            .iter()
            .filter(|(name, _)| name.starts_with("agent_"))
            .all(|(_, data)| data["agent"] == "pm"));
        assert!(events
            .iter()
            .filter(|(name, _)| name == "interaction")
            .all(|(_, data)| data["internal"] == false));

        let (_, complete) = events.last().unwrap();
        assert_eq!(complete["response"]["content"], "plan with mockups");
        let interactions = complete["interactions"].as_array().unwrap();
        assert!(!interactions.is_empty());
        assert!(interactions.iter().all(|r| r["to_agent"] == "pm"));
        let stream_id = events[0].1["stream_id"].as_str().unwrap().to_string();

        // The trail is written just after the terminal event goes out
        let mut trail = None;
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(empty_request("GET", &format!("/api/streams/{}/audit", stream_id)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                trail = Some(json_body(response).await);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let trail = trail.expect("audit trail should be persisted");
        let internal = trail
            .as_array()
            .unwrap()
            .iter()
            .filter(|event| event["type"] == "interaction" && event["internal"] == true)
            .count();
        assert_eq!(internal, 2);
    }

    #[tokio::test]
    async fn failed_primary_ends_with_error_event() {
        let (state, _tmp) = build_state(
            vec![Arc::new(ScriptedAgent::failing(
                "pm",
                agent_coordinator::AgentError::unavailable("pm", "connection refused"),
            ))],
            EngineConfig::default(),
        )
        .await;

        let response = super::router()
            .with_state(state)
            .oneshot(json_request(
                "POST",
                "/api/streams",
                "client-a",
                &CoordinationRequest::new("q", "pm"),
            ))
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let events = parse_sse(&String::from_utf8(body.to_vec()).unwrap());
        let (name, data) = events.last().unwrap();
        assert_eq!(name, "error");
        assert_eq!(data["kind"], "primary_failed");
        assert_eq!(data["agent"], "pm");
    }

    #[tokio::test]
    async fn invalid_stream_request_is_rejected() {
        let (state, _tmp) = build_state(Vec::new(), EngineConfig::default()).await;
        let response = super::router()
            .with_state(state)
            .oneshot(json_request(
                "POST",
                "/api/streams",
                "client-a",
                &CoordinationRequest::new("", "pm"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_audit_trail_is_not_found() {
        let (state, _tmp) = build_state(Vec::new(), EngineConfig::default()).await;
        let response = super::router()
            .with_state(state)
            .oneshot(empty_request(
                "GET",
                &format!("/api/streams/{}/audit", uuid::Uuid::new_v4()),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
