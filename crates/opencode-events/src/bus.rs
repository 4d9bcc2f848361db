//! Event bus for broadcasting events to subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::Event;
use crate::subscriber::SubscriberRegistry;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus for broadcasting events to all subscribers.
///
/// Events are delivered to async receivers in publication order. The
/// synchronous registry is notified before the broadcast send.
#[derive(Debug)]
pub struct EventBus {
    /// Sender for broadcasting events.
    sender: broadcast::Sender<Arc<Event>>,
    /// Registry for synchronous subscribers.
    registry: SubscriberRegistry,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: SubscriberRegistry::new(),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of async receivers that received the event.
    /// Publication never fails: missing receivers are fine, and a
    /// panicking synchronous subscriber is isolated by the registry.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);

        trace!(topic = event.topic(), "publishing event");

        self.registry.notify(&event);

        if let Ok(count) = self.sender.send(Arc::clone(&event)) {
            debug!(topic = event.topic(), receiver_count = count, "event published");
            count
        } else {
            trace!(topic = event.topic(), "no receivers for event");
            0
        }
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// The synchronous subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Current number of async subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        // Shares the broadcast sender; the sync registry is per-handle.
        Self {
            sender: self.sender.clone(),
            registry: SubscriberRegistry::new(),
        }
    }
}

/// Receiver for events from the event bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<Event>>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` when the channel is closed. Lagged receivers skip
    /// dropped events and keep receiving.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencode_core::{TaskId, TaskSnapshot, TaskStatus};

    fn created_event() -> Event {
        Event::TaskCreated {
            task: TaskSnapshot {
                id: TaskId::new(),
                description: None,
                status: TaskStatus::Pending,
                provider: None,
                model: None,
                category: None,
                session_id: None,
                created_at: chrono::Utc::now(),
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let count = bus.publish(created_event());
        assert_eq!(count, 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.topic(), "background.task.created");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(created_event()), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let count = bus.publish(created_event());
        assert_eq!(count, 2);

        assert_eq!(
            first.recv().await.unwrap().topic(),
            "background.task.created"
        );
        assert_eq!(
            second.recv().await.unwrap().topic(),
            "background.task.created"
        );
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_channel() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut receiver = bus.subscribe();

        clone.publish(created_event());
        assert!(receiver.try_recv().is_some());
    }
}
