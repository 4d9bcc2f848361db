//! Event types published on the bus.

use opencode_core::TaskSnapshot;
use serde::{Deserialize, Serialize};

/// All events published by the delegation core.
///
/// Each variant carries a [`TaskSnapshot`] taken at publication time, so
/// subscribers never observe a task mid-mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created and queued.
    TaskCreated {
        /// Snapshot at creation.
        task: TaskSnapshot,
    },

    /// A task was dispatched and is now running.
    TaskStarted {
        /// Snapshot at dispatch.
        task: TaskSnapshot,
    },

    /// A task completed successfully.
    TaskCompleted {
        /// Snapshot including the result.
        task: TaskSnapshot,
    },

    /// A task failed (executor error or stale timeout).
    TaskFailed {
        /// Snapshot including the error.
        task: TaskSnapshot,
    },

    /// A task was cancelled.
    TaskCancelled {
        /// Snapshot at cancellation.
        task: TaskSnapshot,
    },
}

impl Event {
    /// The bus topic this event is published under.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "background.task.created",
            Self::TaskStarted { .. } => "background.task.started",
            Self::TaskCompleted { .. } => "background.task.completed",
            Self::TaskFailed { .. } => "background.task.failed",
            Self::TaskCancelled { .. } => "background.task.cancelled",
        }
    }

    /// The task snapshot carried by this event.
    #[must_use]
    pub fn task(&self) -> &TaskSnapshot {
        match self {
            Self::TaskCreated { task }
            | Self::TaskStarted { task }
            | Self::TaskCompleted { task }
            | Self::TaskFailed { task }
            | Self::TaskCancelled { task } => task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencode_core::{TaskId, TaskStatus};

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            id: TaskId::new(),
            description: Some("demo".to_owned()),
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
        }
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            Event::TaskCreated { task: snapshot() }.topic(),
            "background.task.created"
        );
        assert_eq!(
            Event::TaskFailed { task: snapshot() }.topic(),
            "background.task.failed"
        );
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = Event::TaskStarted { task: snapshot() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_started");
        assert!(json["task"]["id"].as_str().unwrap().starts_with("bg_"));
    }
}
