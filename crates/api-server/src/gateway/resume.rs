//! Handover of reconnecting subscribers to running duplex streams

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_coordinator::{Reconnector, Transport};
use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

type Handover = mpsc::Sender<Box<dyn Transport>>;

/// Running duplex streams by id
#[derive(Clone, Default)]
pub struct ResumeRegistry {
    slots: Arc<RwLock<HashMap<Uuid, Handover>>>,
}

impl ResumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a stream resumable; the slot is the stream's reconnector
    pub async fn register(&self, stream_id: Uuid) -> ResumeSlot {
        let (tx, rx) = mpsc::channel(1);
        self.slots.write().await.insert(stream_id, tx);
        ResumeSlot { stream_id, rx }
    }

    pub async fn remove(&self, stream_id: Uuid) {
        self.slots.write().await.remove(&stream_id);
    }

    pub async fn is_live(&self, stream_id: Uuid) -> bool {
        self.slots
            .read()
            .await
            .get(&stream_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Hand `transport` to the stream's delivery task. The transport comes
    /// back if the stream is gone or already has a pending handover.
    pub async fn resume(
        &self,
        stream_id: Uuid,
        transport: Box<dyn Transport>,
    ) -> Result<(), Box<dyn Transport>> {
        let handover = self.slots.read().await.get(&stream_id).cloned();
        match handover {
            Some(tx) => tx.try_send(transport).map_err(|e| e.into_inner()),
            None => Err(transport),
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}

/// Receiving end of one stream's handover channel
pub struct ResumeSlot {
    stream_id: Uuid,
    rx: mpsc::Receiver<Box<dyn Transport>>,
}

#[async_trait]
impl Reconnector for ResumeSlot {
    async fn reconnect(&mut self, attempt: u32, wait: Duration) -> Option<Box<dyn Transport>> {
        debug!(
            "Stream {} waiting {:?} for a resume (attempt {})",
            self.stream_id, wait, attempt
        );
        tokio::time::timeout(wait, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use agent_coordinator::ChannelTransport;

    fn transport() -> Box<dyn Transport> {
        let (transport, _rx) = ChannelTransport::channel(1);
        Box::new(transport)
    }

    #[tokio::test]
    async fn test_resume_reaches_waiting_stream() {
        let registry = ResumeRegistry::new();
        let stream_id = Uuid::new_v4();
        let mut slot = registry.register(stream_id).await;
        assert!(registry.is_live(stream_id).await);

        assert!(registry.resume(stream_id, transport()).await.is_ok());
        let resumed = slot.reconnect(1, Duration::from_millis(500)).await;
        assert!(resumed.is_some());
    }

    #[tokio::test]
    async fn test_unknown_stream_returns_transport() {
        let registry = ResumeRegistry::new();
        let result = registry.resume(Uuid::new_v4(), transport()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_second_pending_handover_is_refused() {
        let registry = ResumeRegistry::new();
        let stream_id = Uuid::new_v4();
        let _slot = registry.register(stream_id).await;

        assert!(registry.resume(stream_id, transport()).await.is_ok());
        assert!(registry.resume(stream_id, transport()).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_slot_is_not_live() {
        let registry = ResumeRegistry::new();
        let stream_id = Uuid::new_v4();
        drop(registry.register(stream_id).await);

        assert!(!registry.is_live(stream_id).await);
        assert!(registry.resume(stream_id, transport()).await.is_err());

        registry.remove(stream_id).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_times_out() {
        let registry = ResumeRegistry::new();
        let mut slot = registry.register(Uuid::new_v4()).await;
        assert!(slot.reconnect(1, Duration::from_millis(500)).await.is_none());
    }
}
