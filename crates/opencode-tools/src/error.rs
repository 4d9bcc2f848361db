//! Tool-level errors.

use thiserror::Error;

/// Result alias for guarded tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors surfaced to tool callers. Policy denials carry the engine's
/// reason verbatim; none of these ever aborts the host.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The security policy denied the operation.
    #[error("{0}")]
    AccessDenied(String),

    /// The target file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A security engine failure (AST parse, bad pattern).
    #[error(transparent)]
    Security(#[from] opencode_security::SecurityError),
}
