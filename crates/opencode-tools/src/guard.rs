//! The shared secure file pipeline.
//!
//! Access check → protected-segment collection → redaction → audit.
//! Read, grep, glob, write, and the LLM content filters all call into
//! this one place so their semantics cannot drift apart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opencode_audit::{AuditLogEntry, AuditLogger};
use opencode_security::{
    AccessEngine, AstProvider, Operation, ResolvedSecurityConfig, Segment, find_ast_segments,
    find_marker_segments, llm_path_allowed, redact, segments_denied_for,
};
use tracing::debug;

use crate::error::{ToolError, ToolResult};

/// Guarded file access shared by every file-touching tool.
pub struct FileGuard {
    engine: AccessEngine,
    audit: AuditLogger,
    ast: Option<Arc<dyn AstProvider>>,
    root: PathBuf,
}

impl FileGuard {
    /// Create a guard over a resolved config, rooted at the project
    /// directory. The audit log goes to its default location under the
    /// root.
    #[must_use]
    pub fn new(config: Arc<ResolvedSecurityConfig>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            engine: AccessEngine::new(config).with_root(&root),
            audit: AuditLogger::default_in(&root),
            ast: None,
            root,
        }
    }

    /// Use a specific audit logger.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Attach an AST provider for AST-selected segments.
    #[must_use]
    pub fn with_ast_provider(mut self, provider: Arc<dyn AstProvider>) -> Self {
        self.ast = Some(provider);
        self
    }

    /// The underlying access engine.
    #[must_use]
    pub fn engine(&self) -> &AccessEngine {
        &self.engine
    }

    /// The audit logger.
    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Read a file as `role`, with protected segments redacted.
    ///
    /// # Errors
    ///
    /// [`ToolError::AccessDenied`] when the access engine denies the
    /// read; [`ToolError::ReadError`] when the file cannot be read;
    /// [`ToolError::Security`] when segment discovery fails.
    pub fn read_file(&self, path: &Path, role: &str) -> ToolResult<String> {
        self.check(path, Operation::Read, role)?;

        let fs_path = self.fs_path(path);
        let content =
            std::fs::read_to_string(&fs_path).map_err(|source| ToolError::ReadError {
                path: fs_path.display().to_string(),
                source,
            })?;

        let filtered = self.redact_for(path, &content, Operation::Read, role)?;
        self.audit.log(
            &AuditLogEntry::new(role, "read", path.display().to_string(), true)
                .with_content(&filtered),
        );
        Ok(filtered)
    }

    /// Check a write as `role`. Content is audited by hash; segment
    /// rules denying `write` refuse the whole file, since a partial
    /// write cannot be redacted.
    ///
    /// # Errors
    ///
    /// [`ToolError::AccessDenied`] when the engine or a write-denying
    /// segment refuses.
    pub fn check_write(&self, path: &Path, content: &str, role: &str) -> ToolResult<()> {
        self.check(path, Operation::Write, role)?;

        let existing = std::fs::read_to_string(self.fs_path(path)).unwrap_or_default();
        let segments = self.collect_segments(path, &existing)?;
        let denied = segments_denied_for(
            &segments,
            Operation::Write,
            role,
            self.engine.config(),
        );
        if !denied.is_empty() {
            let reason = format!(
                "write access to '{}' denied: file contains protected segments",
                path.display()
            );
            self.audit.log(
                &AuditLogEntry::new(role, "write", path.display().to_string(), false)
                    .with_reason(&reason),
            );
            return Err(ToolError::AccessDenied(reason));
        }

        self.audit.log(
            &AuditLogEntry::new(role, "write", path.display().to_string(), true)
                .with_content(content),
        );
        Ok(())
    }

    /// Filter content bound for an LLM: allowlist check plus redaction
    /// of llm-denied segments.
    ///
    /// # Errors
    ///
    /// [`ToolError::AccessDenied`] when the engine denies `llm` access
    /// or the path is off the allowlist.
    pub fn filter_for_llm(&self, path: &Path, content: &str, role: &str) -> ToolResult<String> {
        self.check(path, Operation::Llm, role)?;

        let normalized = self.match_str(path);
        if !llm_path_allowed(self.engine.config(), &normalized) {
            let reason = format!("llm access to '{normalized}' denied: path is not allowlisted");
            self.audit.log(
                &AuditLogEntry::new(role, "llm", path.display().to_string(), false)
                    .with_reason(&reason),
            );
            return Err(ToolError::AccessDenied(reason));
        }

        let filtered = self.redact_for(path, content, Operation::Llm, role)?;
        self.audit.log(
            &AuditLogEntry::new(role, "llm", path.display().to_string(), true)
                .with_content(&filtered),
        );
        Ok(filtered)
    }

    /// Run the access engine and audit a denial.
    fn check(&self, path: &Path, operation: Operation, role: &str) -> ToolResult<()> {
        let decision = self.engine.check_access(path, operation, Some(role));
        if decision.allowed {
            return Ok(());
        }
        let reason = decision.reason.unwrap_or_default();
        let mut entry =
            AuditLogEntry::new(role, operation.to_string(), path.display().to_string(), false)
                .with_reason(&reason);
        if let Some(rule) = &decision.rule {
            entry = entry.with_rule(rule);
        }
        self.audit.log(&entry);
        debug!(path = %path.display(), %operation, "access denied");
        Err(ToolError::AccessDenied(reason))
    }

    /// Collect marker and AST segments for a file.
    fn collect_segments(&self, path: &Path, content: &str) -> ToolResult<Vec<Segment>> {
        let config = self.engine.config();
        let mut segments = find_marker_segments(content, config.markers());

        if let (Some(provider), Some(language)) = (&self.ast, language_of(path)) {
            segments.extend(find_ast_segments(
                language,
                content,
                config.ast_rules(),
                provider.as_ref(),
            )?);
        }

        Ok(segments)
    }

    /// Redact the segments denied for `role` performing `operation`.
    fn redact_for(
        &self,
        path: &Path,
        content: &str,
        operation: Operation,
        role: &str,
    ) -> ToolResult<String> {
        let segments = self.collect_segments(path, content)?;
        let denied = segments_denied_for(&segments, operation, role, self.engine.config());
        if denied.is_empty() {
            return Ok(content.to_owned());
        }
        Ok(redact(content, &denied))
    }

    fn fs_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn match_str(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Map a file extension to the language name used by AST rules.
fn language_of(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "rs" => Some("rust"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "rb" => Some("ruby"),
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "hpp" => Some("cpp"),
        _ => None,
    }
}
