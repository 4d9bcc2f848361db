//! LLM path allowlist evaluation.
//!
//! Allowlist entries are glob patterns reduced to deterministic literal
//! prefixes; a path must be covered by every configured layer before
//! its content may be shipped to an LLM.

use globset::Glob;

use crate::types::ResolvedSecurityConfig;

/// Extract the literal (non-wildcard) prefix of a glob pattern.
///
/// Leading `**/` and `*/` components are stripped, then the pattern is
/// cut at the first remaining wildcard. Returns `None` when nothing
/// literal remains; such patterns are skipped by the scanner.
#[must_use]
pub fn literal_prefix(pattern: &str) -> Option<String> {
    let mut rest = pattern;
    loop {
        if let Some(stripped) = rest.strip_prefix("**/") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("*/") {
            rest = stripped;
        } else {
            break;
        }
    }

    let cut = rest
        .find(['*', '?', '[', '{'])
        .map_or(rest, |idx| &rest[..idx]);

    if cut.is_empty() {
        None
    } else {
        Some(cut.to_owned())
    }
}

/// Whether a path passes every allowlist layer.
///
/// No layers configured means everything passes. A layer with no
/// entries passes nothing: defining `allowlist: []` denies LLM access
/// to every path from that config file's scope.
#[must_use]
pub fn llm_path_allowed(config: &ResolvedSecurityConfig, path: &str) -> bool {
    let layers = config.allowlist_layers();
    if layers.is_empty() {
        return true;
    }

    layers
        .iter()
        .all(|layer| layer.entries.iter().any(|entry| entry_covers(entry, path)))
}

/// Whether one allowlist entry covers a path: by glob match, or by the
/// entry's literal prefix containing the path.
fn entry_covers(entry: &str, path: &str) -> bool {
    if let Ok(glob) = Glob::new(entry) {
        if glob.compile_matcher().is_match(path) {
            return true;
        }
    }

    let Some(prefix) = literal_prefix(entry) else {
        return false;
    };
    let trimmed = prefix.trim_end_matches('/');
    path == trimmed || path.starts_with(&prefix) || path.starts_with(&format!("{trimmed}/"))
}
