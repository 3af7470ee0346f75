//! WebSocket handler for duplex coordination streams

use agent_coordinator::{Transport, ENDPOINT_STREAM};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use conclave_core::coordination::CoordinationRequest;
use conclave_core::stream::StreamEvent;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{ClientFrame, ServerFrame};
use super::socket::WsTransport;
use crate::identity::ClientIdentity;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    identity: ClientIdentity,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: ClientIdentity) {
    let mut transport = WsTransport::new(socket);

    loop {
        let frame = match transport.next_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(
                    "Socket from {} closed before a stream started: {}",
                    identity.as_str(),
                    e
                );
                return;
            }
        };

        match frame {
            ClientFrame::Ping => {
                if transport.send_frame(&ServerFrame::Pong).await.is_err() {
                    return;
                }
            }
            ClientFrame::Cancel => debug!("Ignoring cancel before start"),
            ClientFrame::Start { request } => {
                return start_stream(&state, &identity, transport, request).await;
            }
            ClientFrame::Resume { stream_id } => {
                return resume_stream(&state, transport, stream_id).await;
            }
        }
    }
}

async fn start_stream(
    state: &AppState,
    identity: &ClientIdentity,
    mut transport: WsTransport,
    request: CoordinationRequest,
) {
    let engine = state.engine();

    if let Err(limited) = engine
        .rate_limiter
        .check(identity.as_str(), ENDPOINT_STREAM)
        .await
    {
        // The subscriber may already be gone; nothing else to do either way
        let _ = transport.send_frame(&ServerFrame::from(limited)).await;
        return;
    }

    let session = match engine.gateway.open(request) {
        Ok(session) => session,
        Err(e) => {
            let _ = transport
                .send_frame(&ServerFrame::rejected("invalid_request", e.to_string()))
                .await;
            return;
        }
    };
    let stream_id = session.stream_id;

    if let Err(e) = transport.send_frame(&ServerFrame::Session { stream_id }).await {
        warn!("Stream {} lost its subscriber before the first frame: {}", stream_id, e);
        session.cancel();
        return;
    }

    let mut slot = state.resumes().register(stream_id).await;
    match engine
        .gateway
        .deliver(session, Box::new(transport), &mut slot)
        .await
    {
        Ok(outcome) => info!(
            "Stream {} finished: {} event(s) delivered, partial={}",
            stream_id, outcome.delivered, outcome.partial
        ),
        Err(e) => warn!("Stream {} ended without delivery: {}", stream_id, e),
    }
    state.resumes().remove(stream_id).await;
}

async fn resume_stream(state: &AppState, mut transport: WsTransport, stream_id: Uuid) {
    let resumes = state.resumes();

    if !resumes.is_live(stream_id).await {
        let _ = transport
            .send_frame(&ServerFrame::rejected(
                "stream_not_found",
                format!("Stream {} is not resumable", stream_id),
            ))
            .await;
        return;
    }
    if transport
        .send_frame(&ServerFrame::Resumed { stream_id })
        .await
        .is_err()
    {
        return;
    }

    match resumes.resume(stream_id, Box::new(transport)).await {
        Ok(()) => info!("Stream {} resumed by a new socket", stream_id),
        Err(mut transport) => {
            // Finished or taken between the check and the handover
            let _ = transport
                .send(&StreamEvent::error(
                    "stream_not_found",
                    format!("Stream {} is no longer resumable", stream_id),
                    None,
                ))
                .await;
        }
    }
}
