//! Append-only writer and reader for the audit log file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::entry::{AccessOutcome, AuditLogEntry};

/// Default audit log file name, relative to the project root.
pub const DEFAULT_LOG_FILE: &str = ".opencode-security-audit.log";

/// Result alias for audit read operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Errors raised when reading the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The log file could not be read.
    #[error("failed to read audit log {path}: {source}")]
    ReadError {
        /// Log file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Fire-and-forget audit log writer.
///
/// Appends one JSON object per line with `O_APPEND` semantics. Write
/// failures are logged internally and swallowed so a broken log can
/// never fail an access check.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    /// Create a logger writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a logger at the default location under `project_root`.
    #[must_use]
    pub fn default_in(project_root: &Path) -> Self {
        Self::new(project_root.join(DEFAULT_LOG_FILE))
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Never fails.
    pub fn log(&self, entry: &AuditLogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit entry");
                return;
            },
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));

        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to append audit entry");
        }
    }
}

/// Reader over the audit log, used by the CLI.
#[derive(Debug, Clone)]
pub struct AuditLogReader {
    path: PathBuf,
}

impl AuditLogReader {
    /// Create a reader over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every parseable entry in file order. Unparseable lines are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ReadError`] when the file cannot be read;
    /// a missing file reads as empty.
    pub fn read_all(&self) -> AuditResult<Vec<AuditLogEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::ReadError {
                    path: self.path.display().to_string(),
                    source: e,
                });
            },
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping unparseable audit line"),
            }
        }
        Ok(entries)
    }

    /// The last `n` entries, optionally restricted to denials.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ReadError`] when the file cannot be read.
    pub fn tail(&self, n: usize, denied_only: bool) -> AuditResult<Vec<AuditLogEntry>> {
        let mut entries = self.read_all()?;
        if denied_only {
            entries.retain(|e| e.result == AccessOutcome::Denied);
        }
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::default_in(tmp.path());

        logger.log(&AuditLogEntry::new("viewer", "read", "a.txt", true));
        logger.log(
            &AuditLogEntry::new("viewer", "write", "b.txt", false).with_reason("denied by rule"),
        );

        let reader = AuditLogReader::new(logger.path());
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].result, AccessOutcome::Allowed);
        assert_eq!(entries[1].result, AccessOutcome::Denied);
    }

    #[test]
    fn test_one_json_object_per_line() {
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::default_in(tmp.path());
        logger.log(&AuditLogEntry::new("viewer", "read", "a.txt", true));
        logger.log(&AuditLogEntry::new("viewer", "read", "b.txt", true));

        let content = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
        }
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        // A directory path cannot be opened for append; logging must
        // still return normally.
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::new(tmp.path());
        logger.log(&AuditLogEntry::new("viewer", "read", "a.txt", true));
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let reader = AuditLogReader::new(tmp.path().join("absent.log"));
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_tail_with_filter() {
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::default_in(tmp.path());
        for i in 0..5 {
            logger.log(&AuditLogEntry::new("viewer", "read", format!("f{i}"), i % 2 == 0));
        }

        let reader = AuditLogReader::new(logger.path());
        let denied = reader.tail(10, true).unwrap();
        assert_eq!(denied.len(), 2);

        let last_two = reader.tail(2, false).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].path, "f4");
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        std::fs::write(&path, "{broken\n").unwrap();

        let logger = AuditLogger::new(&path);
        logger.log(&AuditLogEntry::new("viewer", "read", "a.txt", true));

        let entries = AuditLogReader::new(&path).read_all().unwrap();
        assert_eq!(entries.len(), 1);
    }
}
