//! File-touching tool guards for the opencode delegation core.
//!
//! Every tool that touches the filesystem goes through the same
//! pipeline with identical semantics: access check, protected-segment
//! collection, redaction, audit. This crate provides that pipeline
//! ([`FileGuard`]) plus the shell command scanner that lets the bash
//! tools deny risky commands before execution.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bash;
mod error;
mod guard;

pub use bash::{
    check_interactive_command, guard_command, scan_command_paths, BLOCKED_INTERACTIVE_SUBCOMMANDS,
};
pub use error::{ToolError, ToolResult};
pub use guard::FileGuard;
