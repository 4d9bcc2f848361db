//! Shell command scanning for pre-execution access checks.
//!
//! The scanner extracts the filesystem paths a command is likely to
//! read or write so the access engine can deny the whole command
//! before anything runs. Only a closed set of file-touching commands
//! produces paths; everything else is ignored.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use opencode_audit::{AuditLogEntry, AuditLogger};
use opencode_security::{AccessDecision, AccessEngine, Operation};
use tracing::debug;

/// Subcommands the interactive shell tool refuses outright.
pub const BLOCKED_INTERACTIVE_SUBCOMMANDS: [&str; 4] =
    ["send-keys", "send", "type", "paste-buffer"];

/// Commands whose arguments are scanned for paths.
const FILE_COMMANDS: [&str; 10] = [
    "cat", "less", "head", "tail", "vim", "nano", "grep", "find", "sed", "awk",
];

/// Extract the absolute paths a shell command is likely to touch.
///
/// The command is split on `|`, `;`, `&&`, and `||` (honoring quotes
/// and backslash escapes), each segment is tokenized, and per-command
/// argument rules are applied: value-taking flags consume the next
/// token, `sed`/`awk`/`grep` discard their script or pattern argument,
/// and `find -exec` terminates extraction for its segment. Remaining
/// tokens resolve against `cwd`; the result is deduplicated.
#[must_use]
pub fn scan_command_paths(command: &str, cwd: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut seen = HashSet::new();

    for segment in split_segments(command) {
        for token in extract_segment_paths(&segment) {
            let resolved = resolve(&token, cwd);
            if seen.insert(resolved.clone()) {
                paths.push(resolved);
            }
        }
    }

    paths
}

/// Check every path a command touches against both `read` and `write`.
///
/// The union of likely side effects is checked because the scanner
/// cannot tell redirection targets from sources. The first denial
/// fails the whole command; denials are audited.
#[must_use]
pub fn guard_command(
    engine: &AccessEngine,
    audit: &AuditLogger,
    command: &str,
    cwd: &Path,
    role: &str,
) -> AccessDecision {
    for path in scan_command_paths(command, cwd) {
        for operation in [Operation::Read, Operation::Write] {
            let decision = engine.check_access(&path, operation, Some(role));
            if !decision.allowed {
                let reason = decision.reason.clone().unwrap_or_default();
                let mut entry =
                    AuditLogEntry::new(role, operation.to_string(), path.display().to_string(), false)
                        .with_reason(&reason);
                if let Some(rule) = &decision.rule {
                    entry = entry.with_rule(rule);
                }
                audit.log(&entry);
                debug!(command, path = %path.display(), "bash command denied");
                return decision;
            }
        }
    }
    AccessDecision::allow()
}

/// Refuse interactive-shell commands that inject input into other
/// panes. Returns a denial reason when a blocked subcommand appears.
#[must_use]
pub fn check_interactive_command(command: &str) -> Option<String> {
    for segment in split_segments(command) {
        let tokens = tokenize(&segment);
        if let Some(sub) = tokens.get(1) {
            if BLOCKED_INTERACTIVE_SUBCOMMANDS.contains(&sub.as_str()) {
                return Some(format!("interactive subcommand '{sub}' is not permitted"));
            }
        }
    }
    None
}

/// Split a command line on `|`, `;`, `&&`, `||`, honoring single and
/// double quotes and backslash escapes.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            },
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            },
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            },
            '|' if !in_single && !in_double => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            },
            '&' if !in_single && !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            },
            ';' if !in_single && !in_double => {
                segments.push(std::mem::take(&mut current));
            },
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Tokenize one segment with the same quoting rules, stripping the
/// quotes as it goes.
fn tokenize(segment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = segment.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            },
            '\'' if !in_double => {
                in_single = !in_single;
                quoted = true;
            },
            '"' if !in_single => {
                in_double = !in_double;
                quoted = true;
            },
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                    quoted = false;
                }
            },
            _ => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }

    tokens
}

/// Flags that consume the next token, per command.
fn value_flags(base: &str) -> &'static [&'static str] {
    match base {
        "grep" => &["-e", "--regexp", "-f", "--file", "-m", "-A", "-B", "-C"],
        "find" => &[
            "-name", "-iname", "-path", "-ipath", "-type", "-maxdepth", "-mindepth", "-newer",
            "-perm", "-user", "-group", "-size", "-mtime", "-printf",
        ],
        "sed" => &["-e", "--expression", "-f", "--file"],
        "awk" => &["-f", "-v", "-F"],
        "head" | "tail" => &["-n", "-c"],
        _ => &[],
    }
}

/// Whether the command's first positional argument is a pattern or
/// script rather than a file, absent the corresponding flag.
fn discards_first_positional(base: &str, tokens: &[String]) -> bool {
    match base {
        // grep PATTERN file... unless -e/-f supplied the pattern.
        "grep" => !tokens
            .iter()
            .any(|t| matches!(t.as_str(), "-e" | "--regexp" | "-f" | "--file")),
        // sed SCRIPT file... unless -e/-f supplied the script.
        "sed" => !tokens
            .iter()
            .any(|t| matches!(t.as_str(), "-e" | "--expression" | "-f" | "--file")),
        // awk PROGRAM file... unless -f supplied the program.
        "awk" => !tokens.iter().any(|t| t == "-f"),
        _ => false,
    }
}

/// Apply per-command argument rules to one segment.
fn extract_segment_paths(segment: &str) -> Vec<String> {
    let mut tokens = tokenize(segment);
    if tokens.first().is_some_and(|t| t == "sudo") {
        tokens.remove(0);
    }

    let Some(first) = tokens.first() else {
        return Vec::new();
    };
    let base = first.rsplit('/').next().unwrap_or(first).to_owned();
    if !FILE_COMMANDS.contains(&base.as_str()) {
        return Vec::new();
    }

    let flags = value_flags(&base);
    let mut discard_next_positional = discards_first_positional(&base, &tokens);
    let mut paths = Vec::new();
    let mut iter = tokens.iter().skip(1).peekable();

    while let Some(token) = iter.next() {
        if base == "find" && token == "-exec" {
            break;
        }
        if token.starts_with('-') && token.len() > 1 {
            if flags.contains(&token.as_str()) {
                iter.next();
            }
            continue;
        }
        if discard_next_positional {
            discard_next_positional = false;
            continue;
        }
        paths.push(token.clone());
    }

    paths
}

/// Resolve a token to an absolute, lexically normalized path.
fn resolve(token: &str, cwd: &Path) -> PathBuf {
    let raw = Path::new(token);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        cwd.join(raw)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}
