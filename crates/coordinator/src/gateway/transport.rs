//! Subscriber transports
//!
//! A transport carries [`StreamEvent`]s to exactly one subscriber. One-shot
//! transports (server-sent events) only push; duplex transports (websockets)
//! also carry control frames and can be resumed after a disconnect.

use std::time::Duration;

use async_trait::async_trait;
use conclave_core::stream::StreamEvent;
use thiserror::Error;
use tokio::sync::mpsc;

/// Subscriber-to-server control frame on a duplex transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Ping,
    Cancel,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed by subscriber")]
    Closed,

    #[error("Transport failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError>;

    /// Answer a `ping` control frame
    async fn pong(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Wait for the next control frame, or for the transport to fail.
    /// Must be cancel safe: it is raced against event delivery.
    async fn next_control(&mut self) -> Result<ControlFrame, TransportError>;

    fn is_duplex(&self) -> bool {
        false
    }
}

/// Source of replacement transports after a duplex subscriber disconnects
#[async_trait]
pub trait Reconnector: Send {
    /// Wait up to `wait` for the subscriber to resume. `attempt` is 1-based.
    async fn reconnect(&mut self, attempt: u32, wait: Duration) -> Option<Box<dyn Transport>>;
}

/// Reconnector for one-shot transports, which cannot be resumed
pub struct NoReconnect;

#[async_trait]
impl Reconnector for NoReconnect {
    async fn reconnect(&mut self, _attempt: u32, _wait: Duration) -> Option<Box<dyn Transport>> {
        None
    }
}

/// One-shot transport feeding a bounded channel, e.g. an SSE response body.
/// The channel's capacity is the transport's flow control.
pub struct ChannelTransport {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Transport plus the receiving end to hand to the response body
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn next_control(&mut self) -> Result<ControlFrame, TransportError> {
        // No control channel; resolves only when the subscriber goes away
        self.tx.closed().await;
        Err(TransportError::Closed)
    }
}
