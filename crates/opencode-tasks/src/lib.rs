//! Background task manager for the opencode delegation core.
//!
//! A multi-dimensional concurrency scheduler: one FIFO queue, a default
//! running-task cap, and optional per-provider and per-model caps. A
//! task blocked by its own per-key cap never blocks the tasks queued
//! behind it. Every lifecycle transition publishes a snapshot on the
//! event bus, stale running tasks are reaped by a periodic sweep, and
//! shutdown either cancels or persists in-flight work.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod manager;

pub use config::{TaskManagerConfig, TaskManagerConfigPatch};
pub use manager::{CreateTaskInput, TaskCallbacks, TaskExecutor, TaskManager};
