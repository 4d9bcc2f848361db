//! Synchronous subscriber trait and registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::Event;

/// Trait for synchronous event subscribers.
///
/// `on_event` runs on the publisher's thread and must return quickly.
/// For heavy processing use the async [`crate::EventReceiver`] instead.
pub trait EventSubscriber: Send + Sync {
    /// Called for every published event this subscriber accepts.
    fn on_event(&self, event: &Event);

    /// Filter hook; return `false` to skip an event. Accepts everything
    /// by default.
    fn accepts(&self, event: &Event) -> bool {
        let _ = event;
        true
    }

    /// Name used in log output.
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Registration handle for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Registry for managing synchronous event subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventSubscriber>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber, returning a handle for unregistration.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        let name = subscriber.name().to_owned();

        let mut subs = self.subscribers.write().expect("lock poisoned");
        subs.insert(id, subscriber);

        debug!(subscriber_name = %name, "subscriber registered");
        id
    }

    /// Unregister a subscriber. Returns `true` if it was present.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write().expect("lock poisoned");
        subs.remove(&id).is_some()
    }

    /// Notify all subscribers of an event.
    ///
    /// A panicking subscriber is caught and logged so it cannot affect
    /// the publisher or other subscribers.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn notify(&self, event: &Event) {
        let subs = self.subscribers.read().expect("lock poisoned");

        for subscriber in subs.values() {
            if !subscriber.accepts(event) {
                continue;
            }

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(event);
            }));

            if result.is_err() {
                warn!(
                    subscriber_name = subscriber.name(),
                    topic = event.topic(),
                    "subscriber panicked"
                );
            }
        }
    }

    /// Number of registered subscribers.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().expect("lock poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencode_core::{TaskId, TaskSnapshot, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    struct Counter(AtomicUsize);

    impl EventSubscriber for Counter {
        fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl EventSubscriber for Panicker {
        fn on_event(&self, _event: &Event) {
            panic!("subscriber failure");
        }
    }

    #[test]
    fn test_register_and_notify() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register(Arc::clone(&counter) as Arc<dyn EventSubscriber>);

        registry.notify(&created_event());
        registry.notify(&created_event());

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let id = registry.register(Arc::clone(&counter) as Arc<dyn EventSubscriber>);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        registry.notify(&created_event());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register(Arc::new(Panicker));
        registry.register(Arc::clone(&counter) as Arc<dyn EventSubscriber>);

        registry.notify(&created_event());

        // The publisher survives and the other subscriber still ran.
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
