//! Process-wide event bus for the opencode delegation core.
//!
//! Every state-changing operation in the task manager publishes here.
//! There are two ways to consume events:
//!
//! 1. **Async receivers**: `bus.subscribe()` returns an [`EventReceiver`]
//!    backed by a broadcast channel.
//! 2. **Synchronous subscribers**: register an [`EventSubscriber`] with
//!    the registry for immediate callback notification.
//!
//! Publication is fire-and-forget: a slow, missing, or panicking
//! subscriber never affects the publisher.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::Event;
pub use subscriber::{EventSubscriber, SubscriberId, SubscriberRegistry};
