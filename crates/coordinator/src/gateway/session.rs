//! Stream sessions: the run pump and the delivery loop

use std::sync::Arc;
use std::time::Duration;

use conclave_core::coordination::CoordinationRequest;
use conclave_core::store::{get_json, set_json, KvStore};
use conclave_core::stream::{StreamEvent, StreamPayload};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::filter::{visible_view, EventBuffer};
use super::transport::{ControlFrame, Reconnector, Transport, TransportError};
use crate::config::ReconnectPolicy;
use crate::coordinator::{CoordinationEvent, Coordinator, RunControl, EVENT_BUFFER};
use crate::error::StreamError;

const AUDIT_PREFIX: &str = "audit:";

/// How a delivered stream ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOutcome {
    pub stream_id: Uuid,
    /// Events written to the subscriber
    pub delivered: usize,
    /// Final response, or the primary's partial output when `partial` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub partial: bool,
}

/// A started run whose events wait in a buffer for a subscriber
pub struct StreamSession {
    pub stream_id: Uuid,
    primary_agent: String,
    buffer: Arc<EventBuffer>,
    partial: Arc<Mutex<String>>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl StreamSession {
    pub fn primary_agent(&self) -> &str {
        &self.primary_agent
    }

    /// Stop the run before its next step
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // A session nobody delivers has no subscriber left
        if !self.pump.is_finished() {
            self.cancel.cancel();
        }
    }
}

#[derive(Clone)]
pub struct StreamingGateway {
    coordinator: Arc<Coordinator>,
    audit: Arc<dyn KvStore>,
    audit_ttl: Duration,
    reconnect: ReconnectPolicy,
}

enum Recovery {
    Resumed(Box<dyn Transport>),
    GaveUp(Result<StreamOutcome, StreamError>),
}

impl StreamingGateway {
    pub fn new(
        coordinator: Arc<Coordinator>,
        audit: Arc<dyn KvStore>,
        audit_ttl: Duration,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            coordinator,
            audit,
            audit_ttl,
            reconnect,
        }
    }

    /// Start a run. Its events buffer until [`deliver`](Self::deliver) is called.
    pub fn open(&self, request: CoordinationRequest) -> Result<StreamSession, StreamError> {
        request
            .validate()
            .map_err(|e| StreamError::InvalidRequest(e.to_string()))?;

        let stream_id = Uuid::new_v4();
        let primary_agent = request.primary_agent.clone();
        let buffer = Arc::new(EventBuffer::new());
        let partial = Arc::new(Mutex::new(String::new()));
        let cancel = CancellationToken::new();

        let pump = Pump {
            stream_id,
            coordinator: self.coordinator.clone(),
            audit: self.audit.clone(),
            audit_ttl: self.audit_ttl,
            buffer: buffer.clone(),
            partial: partial.clone(),
            cancel: cancel.clone(),
        };
        let pump = tokio::spawn(pump.run(request));

        info!("Opened stream {}", stream_id);
        Ok(StreamSession {
            stream_id,
            primary_agent,
            buffer,
            partial,
            cancel,
            pump,
        })
    }

    /// Full event sequence of a finished stream, internal events included
    pub async fn audit_trail(
        &self,
        stream_id: Uuid,
    ) -> conclave_core::Result<Option<Vec<StreamEvent>>> {
        get_json(self.audit.as_ref(), &audit_key(stream_id)).await
    }

    /// Deliver a session's events over `transport` until a terminal event has
    /// been sent or the subscriber is gone for good
    pub async fn deliver(
        &self,
        session: StreamSession,
        transport: Box<dyn Transport>,
        reconnector: &mut dyn Reconnector,
    ) -> Result<StreamOutcome, StreamError> {
        let mut transport = transport;
        let mut delivered = 0usize;

        loop {
            let batch = session.buffer.drain().await;
            if !batch.is_empty() {
                let mut failure = None;
                for event in batch {
                    match transport.send(&event).await {
                        Ok(()) => {
                            delivered += 1;
                            if event.is_terminal() {
                                return Ok(finished(session.stream_id, delivered, event));
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = failure {
                    match self.recover(&session, transport, reconnector, e, delivered).await {
                        Recovery::Resumed(next) => transport = next,
                        Recovery::GaveUp(outcome) => return outcome,
                    }
                }
                continue;
            }

            if session.buffer.is_drained().await {
                // Closed without a terminal event; only possible if the pump died
                warn!("Stream {} ended without a terminal event", session.stream_id);
                return Err(StreamError::TransportDisconnected { attempts: 0 });
            }

            let control = tokio::select! {
                frame = transport.next_control() => Some(frame),
                _ = session.buffer.notified() => None,
            };
            let result = match control {
                None => continue,
                Some(Ok(ControlFrame::Ping)) => transport.pong().await,
                Some(Ok(ControlFrame::Cancel)) => {
                    info!("Stream {} cancelled by subscriber", session.stream_id);
                    session.cancel();
                    Ok(())
                }
                Some(Err(e)) => Err(e),
            };
            if let Err(e) = result {
                match self.recover(&session, transport, reconnector, e, delivered).await {
                    Recovery::Resumed(next) => transport = next,
                    Recovery::GaveUp(outcome) => return outcome,
                }
            }
        }
    }

    /// Bounded exponential backoff for duplex transports. Events produced
    /// while disconnected are dropped.
    async fn recover(
        &self,
        session: &StreamSession,
        transport: Box<dyn Transport>,
        reconnector: &mut dyn Reconnector,
        err: TransportError,
        delivered: usize,
    ) -> Recovery {
        warn!("Stream {} transport lost: {}", session.stream_id, err);
        let mut attempts = 0;

        if transport.is_duplex() {
            drop(transport);
            for attempt in 1..=self.reconnect.max_attempts {
                attempts = attempt;
                let wait = self.reconnect.delay_for(attempt);
                debug!(
                    "Stream {} reconnect attempt {}/{} (waiting {:?})",
                    session.stream_id, attempt, self.reconnect.max_attempts, wait
                );
                if let Some(next) = reconnector.reconnect(attempt, wait).await {
                    let dropped = session.buffer.discard_pending().await;
                    info!(
                        "Stream {} resumed after {} attempt(s); {} event(s) dropped",
                        session.stream_id, attempt, dropped
                    );
                    return Recovery::Resumed(next);
                }
            }
        }

        session.cancel();
        let partial = session.partial.lock().await.clone();
        if partial.trim().is_empty() {
            warn!("Stream {} gave up after {} attempt(s)", session.stream_id, attempts);
            return Recovery::GaveUp(Err(StreamError::TransportDisconnected { attempts }));
        }
        info!("Stream {} gave up; returning partial response", session.stream_id);
        Recovery::GaveUp(Ok(StreamOutcome {
            stream_id: session.stream_id,
            delivered,
            content: Some(partial),
            partial: true,
        }))
    }
}

fn finished(stream_id: Uuid, delivered: usize, terminal: StreamEvent) -> StreamOutcome {
    let content = match terminal.payload {
        StreamPayload::Complete { response, .. } => Some(response.content),
        _ => None,
    };
    StreamOutcome {
        stream_id,
        delivered,
        content,
        partial: false,
    }
}

fn audit_key(stream_id: Uuid) -> String {
    format!("{}{}", AUDIT_PREFIX, stream_id)
}

/// Drives one coordination run and routes its events
struct Pump {
    stream_id: Uuid,
    coordinator: Arc<Coordinator>,
    audit: Arc<dyn KvStore>,
    audit_ttl: Duration,
    buffer: Arc<EventBuffer>,
    partial: Arc<Mutex<String>>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self, request: CoordinationRequest) {
        let primary = request.primary_agent.clone();
        let mut trail = Vec::new();

        let start = StreamEvent::start(
            self.stream_id,
            &primary,
            request.coordination_mode,
            request.agents().into_iter().map(str::to_string).collect(),
        );
        self.publish(&primary, &mut trail, start).await;

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let control = RunControl::new()
            .with_events(tx)
            .with_cancel(self.cancel.clone());
        let coordinator = self.coordinator.clone();

        // Owns the control so the event channel closes when the run ends.
        // Cancellation is observed between steps; calls already dispatched
        // run until they answer or hit their own timeout.
        let run = async move { coordinator.coordinate_with(&request, &control).await };
        let route = async {
            let mut trail = Vec::new();
            while let Some(event) = rx.recv().await {
                if let Some(event) = self.translate(&primary, event).await {
                    self.publish(&primary, &mut trail, event).await;
                }
            }
            trail
        };
        let (result, routed) = tokio::join!(run, route);
        trail.extend(routed);

        let terminal = match result {
            Ok(outcome) => StreamEvent::complete(outcome),
            Err(e) => StreamEvent::error(e.kind(), e.to_string(), e.agent().map(str::to_string)),
        };
        self.publish(&primary, &mut trail, terminal).await;
        self.buffer.close().await;

        if let Err(e) = set_json(
            self.audit.as_ref(),
            &audit_key(self.stream_id),
            &trail,
            Some(self.audit_ttl),
        )
        .await
        {
            warn!("Failed to persist audit trail of stream {}: {}", self.stream_id, e);
        }
        debug!("Stream {} run finished with {} event(s)", self.stream_id, trail.len());
    }

    /// Every event goes to the audit trail unchanged; the subscriber gets the
    /// visible view of it, if any
    async fn publish(&self, primary: &str, trail: &mut Vec<StreamEvent>, event: StreamEvent) {
        if let Some(view) = visible_view(&event, primary) {
            self.buffer.push(view).await;
        }
        trail.push(event);
    }

    /// Map a coordinator event to a stream event, tracking the primary's output
    async fn translate(&self, primary: &str, event: CoordinationEvent) -> Option<StreamEvent> {
        match event {
            CoordinationEvent::AgentStarted { agent } => {
                if agent == primary {
                    self.partial.lock().await.clear();
                }
                Some(StreamEvent::agent_start(agent))
            }
            CoordinationEvent::Chunk { agent, chunk } => {
                if agent == primary {
                    self.partial.lock().await.push_str(&chunk);
                }
                Some(StreamEvent::agent_chunk(agent, chunk))
            }
            CoordinationEvent::AgentCompleted { response } => {
                if response.agent_name == primary {
                    *self.partial.lock().await = response.content.clone();
                }
                Some(StreamEvent::agent_complete(response))
            }
            CoordinationEvent::AgentFailed { error } => {
                debug!("Stream {}: {}", self.stream_id, error);
                None
            }
            CoordinationEvent::Interaction { record } => {
                let internal = record.is_internal(primary);
                Some(StreamEvent::interaction(&record, internal))
            }
            CoordinationEvent::Progress { progress, message } => {
                Some(StreamEvent::progress(progress, message))
            }
        }
    }
}
