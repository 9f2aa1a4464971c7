use super::types::{EventSequence, QueueEvent, QueueEventPayload};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<QueueEvent>;
pub type EventSender = broadcast::Sender<QueueEvent>;

/// Event bus for distributing queue events to attached UIs
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number)
    ///
    /// Fails only when nobody is subscribed; the queue treats that as fine.
    pub fn publish(
        &self,
        component: &str,
        payload: QueueEventPayload,
    ) -> Result<EventSequence, String> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = QueueEvent {
            sequence,
            timestamp: Utc::now(),
            component: component.to_string(),
            payload,
        };

        self.sender
            .send(event)
            .map(|_| sequence)
            .map_err(|e| format!("Failed to publish event: {}", e))
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
