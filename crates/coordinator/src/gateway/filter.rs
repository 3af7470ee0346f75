//! Visibility routing and the pending-event buffer

use std::collections::VecDeque;

use conclave_core::stream::{StreamEvent, StreamPayload};
use tokio::sync::{Mutex, Notify};

/// Whether an event may reach the subscriber. Agent activity is only shown
/// for the primary agent; interactions flagged internal stay in the audit trail.
pub fn is_visible(event: &StreamEvent, primary_agent: &str) -> bool {
    match &event.payload {
        StreamPayload::AgentStart { agent }
        | StreamPayload::AgentChunk { agent, .. }
        | StreamPayload::AgentComplete { agent, .. } => agent == primary_agent,
        StreamPayload::Interaction { internal, .. } => !internal,
        _ => true,
    }
}

/// The subscriber's copy of an event, or `None` when it stays in the audit
/// trail. The terminal result keeps only interactions addressed to the primary.
pub fn visible_view(event: &StreamEvent, primary_agent: &str) -> Option<StreamEvent> {
    if !is_visible(event, primary_agent) {
        return None;
    }
    let mut event = event.clone();
    if let StreamPayload::Complete { interactions, .. } = &mut event.payload {
        interactions.retain(|record| !record.is_internal(primary_agent));
    }
    Some(event)
}

/// Events waiting for delivery, in FIFO order
///
/// Consecutive chunks of the same agent are merged so that a slow subscriber
/// holds at most one undelivered chunk per message boundary.
#[derive(Default)]
pub struct EventBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

#[derive(Default)]
struct BufferState {
    queue: VecDeque<StreamEvent>,
    closed: bool,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, event: StreamEvent) {
        {
            let mut state = self.state.lock().await;
            if !coalesce(state.queue.back_mut(), &event) {
                state.queue.push_back(event);
            }
        }
        self.notify.notify_one();
    }

    /// No more events will be pushed
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_one();
    }

    /// Take everything pending
    pub async fn drain(&self) -> Vec<StreamEvent> {
        self.state.lock().await.queue.drain(..).collect()
    }

    /// Drop pending events except a terminal one. Used after a reconnect:
    /// delivery is at-most-once, so nothing produced while disconnected is replayed.
    pub async fn discard_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.queue.len();
        state.queue.retain(StreamEvent::is_terminal);
        before - state.queue.len()
    }

    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.closed && state.queue.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Wait until something was pushed or the buffer was closed
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

fn coalesce(last: Option<&mut StreamEvent>, next: &StreamEvent) -> bool {
    let (
        Some(StreamEvent {
            payload: StreamPayload::AgentChunk { agent, chunk },
            timestamp,
        }),
        StreamPayload::AgentChunk {
            agent: next_agent,
            chunk: next_chunk,
        },
    ) = (last, &next.payload)
    else {
        return false;
    };
    if agent.as_str() != next_agent.as_str() {
        return false;
    }
    chunk.push_str(next_chunk);
    *timestamp = next.timestamp;
    true
}
