//! Error types for the security engine.

use thiserror::Error;

/// Result alias for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors raised by the security engine.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// A config file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file contained invalid JSON.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// Path of the offending file.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The same role is defined with different levels across merged files.
    #[error("role '{name}' defined with conflicting levels {first} and {second}")]
    RoleConflict {
        /// Role name.
        name: String,
        /// Level from the more specific file.
        first: i64,
        /// Conflicting level from a less specific file.
        second: i64,
    },

    /// A rule pattern failed to compile as a glob.
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// A `namePattern` failed to compile as a regex.
    #[error("invalid name pattern '{pattern}': {message}")]
    InvalidNamePattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// An AST provider failed to parse a file.
    #[error("failed to parse {language} source: {message}")]
    AstParse {
        /// Language the provider was asked for.
        language: String,
        /// Provider message.
        message: String,
    },

    /// A role token failed verification.
    #[error("invalid role token: {0}")]
    TokenInvalid(String),

    /// A role token's `jti` is on the revocation list.
    #[error("role token '{jti}' has been revoked")]
    TokenRevoked {
        /// The revoked token ID.
        jti: String,
    },

    /// The signing key could not be read or used.
    #[error("key error: {0}")]
    KeyError(String),
}
