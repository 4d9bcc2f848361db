//! Security policy engine for the opencode delegation core.
//!
//! This crate owns the full policy pipeline that every file-touching
//! tool traverses:
//!
//! 1. **Config loading** — `.opencode-security.json` files are collected
//!    from the project directory up to the git root and merged into one
//!    immutable [`ResolvedSecurityConfig`].
//! 2. **Access checks** — glob rules with role hierarchy, directory
//!    inheritance, and symlink resolution ([`AccessEngine`]).
//! 3. **Protected segments** — commented marker regions and AST-selected
//!    nodes inside otherwise-readable files.
//! 4. **Redaction** — placeholder replacement that preserves line
//!    topology, applied to content shipped to agents.
//!
//! The resolved config is shared between parent and delegated child
//! executions as an `Arc`: the snapshot has no interior mutability, so a
//! child can observe but never alter its parent's policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod access;
mod allowlist;
mod error;
mod loader;
mod redact;
mod segments;
mod token;
mod types;

pub use access::{AccessDecision, AccessEngine};
pub use allowlist::{literal_prefix, llm_path_allowed};
pub use error::{SecurityError, SecurityResult};
pub use loader::{load, load_from_files};
pub use redact::{REDACTION_PLACEHOLDER, merge_ranges, redact};
pub use segments::{AstNode, AstProvider, Segment, find_ast_segments, find_marker_segments, segments_denied_for};
pub use token::{
    PRIVATE_KEY_FILE_NAME, RoleTokenClaims, issue_role_token, verify_role_token,
};
pub use types::{
    AUDIT_LOG_FILE_NAME, AllowlistLayer, AstRuleConfig, AuthenticationConfig, CONFIG_FILE_NAME,
    LogLevel, LoggingConfig, MarkerConfig, McpPolicy, McpSection, Operation,
    ResolvedSecurityConfig, Role, Rule, RuleType, SecurityConfigFile, SegmentsSection, role_allows,
};
