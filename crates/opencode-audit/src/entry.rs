//! Audit entry shape and construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outcome of an evaluated access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    /// The operation was allowed.
    Allowed,
    /// The operation was denied.
    Denied,
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// When the access was evaluated (ISO-8601, UTC).
    pub timestamp: DateTime<Utc>,
    /// Role the access was evaluated for.
    pub role: String,
    /// Operation (`read`, `write`, `llm`, or a tool-level name).
    pub operation: String,
    /// Path the operation targeted.
    pub path: String,
    /// Whether the access was allowed.
    pub result: AccessOutcome,
    /// Denial reason, when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Pattern of the rule that fired, when one did.
    #[serde(rename = "ruleTriggered", skip_serializing_if = "Option::is_none")]
    pub rule_triggered: Option<String>,
    /// SHA-256 of the content involved, when content was supplied.
    #[serde(rename = "contentHash", skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl AuditLogEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(
        role: impl Into<String>,
        operation: impl Into<String>,
        path: impl Into<String>,
        allowed: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            role: role.into(),
            operation: operation.into(),
            path: path.into(),
            result: if allowed {
                AccessOutcome::Allowed
            } else {
                AccessOutcome::Denied
            },
            reason: None,
            rule_triggered: None,
            content_hash: None,
        }
    }

    /// Attach a denial reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach the pattern of the rule that fired.
    #[must_use]
    pub fn with_rule(mut self, pattern: impl Into<String>) -> Self {
        self.rule_triggered = Some(pattern.into());
        self
    }

    /// Hash `content` and attach the digest.
    #[must_use]
    pub fn with_content(mut self, content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        self.content_hash = Some(hex::encode(digest));
        self
    }
}
