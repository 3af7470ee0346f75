//! WebSocket as a duplex stream transport

use agent_coordinator::{ControlFrame, Transport, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use conclave_core::stream::StreamEvent;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use super::protocol::{ClientFrame, ServerFrame};

pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
    stream: SplitStream<WebSocket>,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self { sink, stream }
    }

    pub async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), TransportError> {
        let message = encode(frame)?;
        self.send_message(message).await
    }

    /// Next well-formed client frame. Cancel safe.
    pub async fn next_frame(&mut self) -> Result<ClientFrame, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(frame) => return Ok(frame),
                        Err(e) => warn!("Ignoring malformed client frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Failed(e.to_string())),
            }
        }
    }

    async fn send_message(&mut self, message: Message) -> Result<(), TransportError> {
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        let message = encode(event)?;
        self.send_message(message).await
    }

    async fn pong(&mut self) -> Result<(), TransportError> {
        self.send_frame(&ServerFrame::Pong).await
    }

    async fn next_control(&mut self) -> Result<ControlFrame, TransportError> {
        loop {
            match self.next_frame().await? {
                ClientFrame::Ping => return Ok(ControlFrame::Ping),
                ClientFrame::Cancel => return Ok(ControlFrame::Cancel),
                other => debug!("Ignoring {:?} on a running stream", other),
            }
        }
    }

    fn is_duplex(&self) -> bool {
        true
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Message, TransportError> {
    serde_json::to_string(value)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| TransportError::Failed(e.to_string()))
}
