//! Dispatcher errors.
//!
//! Every variant maps to a structured tool error with
//! `metadata.error = true` and no side effects on the task manager.

use thiserror::Error;

/// Result alias for dispatcher operations.
pub type DelegateResult<T> = Result<T, DelegateError>;

/// Errors surfaced by the delegation dispatcher.
#[derive(Debug, Error)]
pub enum DelegateError {
    /// A delegated agent tried to delegate again.
    #[error("delegation is not available from within a delegated agent")]
    SubagentContext,

    /// Both `category` and `subagent_type` were supplied.
    #[error("category and subagent_type are mutually exclusive")]
    MutuallyExclusive,

    /// The requested agent does not exist or is not accessible.
    #[error("unknown agent '{name}'. Accessible agents: {available}")]
    UnknownAgent {
        /// Requested agent name.
        name: String,
        /// Comma-separated accessible agent names.
        available: String,
    },

    /// The requested category does not exist.
    #[error("unknown category '{name}'. Available categories: {available}")]
    UnknownCategory {
        /// Requested category name.
        name: String,
        /// Comma-separated category names.
        available: String,
    },

    /// No task with the given ID.
    #[error("unknown task '{id}'")]
    UnknownTask {
        /// Requested task ID.
        id: String,
    },

    /// The task already reached a terminal state.
    #[error("task '{id}' is already {status}")]
    TaskTerminal {
        /// Requested task ID.
        id: String,
        /// Its terminal status.
        status: String,
    },

    /// The caller aborted a synchronous delegation.
    #[error("delegated prompt aborted by caller")]
    Aborted,

    /// The prompt-session runtime failed.
    #[error("delegated prompt failed: {0}")]
    PromptFailed(String),
}

impl DelegateError {
    /// Tool-boundary metadata for this error.
    #[must_use]
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({ "error": true })
    }
}
