//! Append-only JSONL security audit log.
//!
//! Every security-relevant access decision is recorded as one JSON
//! object per line. Writes are fire-and-forget: a logger failure is
//! itself logged and swallowed, never surfaced to the caller. The
//! security config loader protects the log file from managed writes
//! with an implicit rule.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod entry;
mod logger;

pub use entry::{AccessOutcome, AuditLogEntry};
pub use logger::{AuditError, AuditLogReader, AuditLogger, AuditResult, DEFAULT_LOG_FILE};
