//! Config file discovery and merging.
//!
//! `.opencode-security.json` files are collected from a starting
//! directory up to the git root, most specific first, then merged into
//! one immutable [`ResolvedSecurityConfig`]. Individual malformed files
//! are skipped with a warning; conflicting role levels across files are
//! fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::Glob;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{SecurityError, SecurityResult};
use crate::types::{
    AllowlistLayer, CONFIG_FILE_NAME, McpSection, ResolvedSecurityConfig, Role, Rule,
    SecurityConfigFile,
};

/// Load and merge security configuration starting from `project_dir`.
///
/// Discovery walks from `project_dir` up to the first ancestor
/// containing `.git`, collecting every config file on the way; without
/// a git root only `project_dir` itself is checked.
///
/// # Errors
///
/// Returns [`SecurityError::RoleConflict`] when the same role name is
/// defined with different levels across merged files. Unreadable or
/// invalid files are skipped with a warning, never an error.
pub fn load(project_dir: &Path) -> SecurityResult<Arc<ResolvedSecurityConfig>> {
    let mut parsed = Vec::new();

    for path in discover(project_dir) {
        match parse_file(&path) {
            Ok(file) => {
                info!(path = %path.display(), "loaded security config");
                parsed.push((path, file));
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping invalid security config");
            },
        }
    }

    Ok(Arc::new(load_from_files(parsed)?))
}

/// Merge already-parsed config files (most specific first) into a
/// resolved config. Exposed separately so hosts and tests can assemble
/// layers without touching the filesystem.
///
/// # Errors
///
/// Returns [`SecurityError::RoleConflict`] on conflicting role levels.
pub fn load_from_files(
    files: Vec<(PathBuf, SecurityConfigFile)>,
) -> SecurityResult<ResolvedSecurityConfig> {
    let mut version: Option<String> = None;
    let mut roles: Vec<Role> = Vec::new();
    let mut rules: Vec<Rule> = Vec::new();
    let mut markers = Vec::new();
    let mut ast = Vec::new();
    let mut logging = None;
    let mut authentication = None;
    let mut mcp: Option<McpSection> = None;
    let mut allowlist_layers: Vec<AllowlistLayer> = Vec::new();

    for (source, file) in files {
        if version.is_none() {
            version = file.version;
        }

        if let Some(file_roles) = file.roles {
            for role in file_roles {
                match roles.iter().find(|r| r.name == role.name) {
                    Some(existing) if existing.level != role.level => {
                        return Err(SecurityError::RoleConflict {
                            name: role.name,
                            first: existing.level,
                            second: role.level,
                        });
                    },
                    Some(_) => {},
                    None => roles.push(role),
                }
            }
        }

        if let Some(file_rules) = file.rules {
            rules.extend(file_rules);
        }

        if let Some(segments) = file.segments {
            markers.extend(segments.markers);
            ast.extend(segments.ast);
        }

        if logging.is_none() {
            logging = file.logging;
        }
        if authentication.is_none() {
            authentication = file.authentication;
        }

        if let Some(file_mcp) = file.mcp {
            mcp = Some(merge_mcp(mcp, file_mcp));
        }

        if let Some(entries) = file.allowlist {
            if entries.is_empty() {
                warn!(
                    source = %source.display(),
                    "empty allowlist: llm operations will be denied for all paths"
                );
            }
            allowlist_layers.push(AllowlistLayer { source, entries });
        }
    }

    Ok(ResolvedSecurityConfig::new(
        version,
        roles,
        rules,
        markers,
        ast,
        logging,
        authentication,
        mcp,
        allowlist_layers,
    ))
}

/// Collect config file paths, most specific first.
fn discover(project_dir: &Path) -> Vec<PathBuf> {
    let Some(git_root) = find_git_root(project_dir) else {
        let candidate = project_dir.join(CONFIG_FILE_NAME);
        debug!(path = %project_dir.display(), "no git root; checking starting directory only");
        return if candidate.is_file() {
            vec![candidate]
        } else {
            Vec::new()
        };
    };

    let mut paths = Vec::new();
    let mut dir = project_dir;
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            paths.push(candidate);
        }
        if dir == git_root {
            break;
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    paths
}

/// Find the first ancestor (including `start`) containing `.git`.
fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Parse and validate one config file.
fn parse_file(path: &Path) -> SecurityResult<SecurityConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| SecurityError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let file: SecurityConfigFile =
        serde_json::from_str(&content).map_err(|e| SecurityError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;

    validate(&file)?;
    Ok(file)
}

/// Schema-level validation of one parsed file.
fn validate(file: &SecurityConfigFile) -> SecurityResult<()> {
    if let Some(rules) = &file.rules {
        for rule in rules {
            Glob::new(&rule.pattern).map_err(|e| SecurityError::InvalidPattern {
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
        }
    }

    if let Some(segments) = &file.segments {
        for marker in &segments.markers {
            if marker.start.is_empty() || marker.end.is_empty() {
                return Err(SecurityError::InvalidPattern {
                    pattern: format!("{} .. {}", marker.start, marker.end),
                    message: "marker tokens must be non-empty".to_owned(),
                });
            }
        }
        for ast_rule in &segments.ast {
            Regex::new(&ast_rule.name_pattern).map_err(|e| SecurityError::InvalidNamePattern {
                pattern: ast_rule.name_pattern.clone(),
                message: e.to_string(),
            })?;
        }
    }

    Ok(())
}

fn merge_mcp(base: Option<McpSection>, overlay: McpSection) -> McpSection {
    let Some(mut merged) = base else {
        return overlay;
    };

    merged.default_policy = match (merged.default_policy, overlay.default_policy) {
        (Some(a), Some(b)) => Some(a.most_restrictive(b)),
        (a, b) => a.or(b),
    };

    for (server, policy) in overlay.servers {
        merged
            .servers
            .entry(server)
            .and_modify(|existing| *existing = existing.most_restrictive(policy))
            .or_insert(policy);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AUDIT_LOG_FILE_NAME, McpPolicy, Operation};
    use tempfile::TempDir;

    fn write_config(dir: &Path, json: &str) {
        std::fs::write(dir.join(CONFIG_FILE_NAME), json).unwrap();
    }

    #[test]
    fn test_discover_without_git_root() {
        let tmp = TempDir::new().unwrap();
        write_config(tmp.path(), "{}");

        let paths = discover(tmp.path());
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_discover_walks_to_git_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        write_config(tmp.path(), "{}");
        write_config(&nested, "{}");

        let paths = discover(&nested);
        assert_eq!(paths.len(), 2);
        // Most specific first.
        assert!(paths[0].starts_with(&nested));
        assert_eq!(paths[1], tmp.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_invalid_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write_config(tmp.path(), "not json at all");

        let config = load(tmp.path()).unwrap();
        // Only the implicit rules survive.
        assert_eq!(config.rules().len(), 2);
    }

    #[test]
    fn test_role_merge_same_level_ok() {
        let file_a: SecurityConfigFile = serde_json::from_str(
            r#"{"roles": [{"name": "admin", "level": 10}]}"#,
        )
        .unwrap();
        let file_b: SecurityConfigFile = serde_json::from_str(
            r#"{"roles": [{"name": "admin", "level": 10}, {"name": "viewer", "level": 1}]}"#,
        )
        .unwrap();

        let config = load_from_files(vec![
            (PathBuf::from("a"), file_a),
            (PathBuf::from("b"), file_b),
        ])
        .unwrap();
        assert_eq!(config.roles().len(), 2);
    }

    #[test]
    fn test_role_level_conflict_is_fatal() {
        let file_a: SecurityConfigFile =
            serde_json::from_str(r#"{"roles": [{"name": "admin", "level": 10}]}"#).unwrap();
        let file_b: SecurityConfigFile =
            serde_json::from_str(r#"{"roles": [{"name": "admin", "level": 5}]}"#).unwrap();

        let result = load_from_files(vec![
            (PathBuf::from("a"), file_a),
            (PathBuf::from("b"), file_b),
        ]);
        assert!(matches!(result, Err(SecurityError::RoleConflict { .. })));
    }

    #[test]
    fn test_mcp_merge_most_restrictive() {
        let child: SecurityConfigFile =
            serde_json::from_str(r#"{"mcp": {"servers": {"websearch": "trusted"}}}"#).unwrap();
        let parent: SecurityConfigFile =
            serde_json::from_str(r#"{"mcp": {"servers": {"websearch": "blocked"}}}"#).unwrap();

        let config = load_from_files(vec![
            (PathBuf::from("child"), child),
            (PathBuf::from("parent"), parent),
        ])
        .unwrap();
        assert_eq!(config.get_mcp_policy("websearch"), McpPolicy::Blocked);
    }

    #[test]
    fn test_implicit_rules_appended() {
        let config = load_from_files(vec![]).unwrap();
        let patterns: Vec<&str> = config.rules().iter().map(|r| r.pattern.as_str()).collect();
        assert!(patterns.contains(&CONFIG_FILE_NAME));
        assert!(patterns.contains(&AUDIT_LOG_FILE_NAME));
        for rule in config.rules() {
            assert_eq!(rule.denied_operations, vec![Operation::Write]);
            assert!(rule.allowed_roles.is_empty());
        }
    }

    #[test]
    fn test_implicit_rule_not_duplicated() {
        let file: SecurityConfigFile = serde_json::from_str(
            r#"{"rules": [{"pattern": ".opencode-security.json", "type": "file",
                 "deniedOperations": ["write", "read"], "allowedRoles": []}]}"#,
        )
        .unwrap();

        let config = load_from_files(vec![(PathBuf::from("a"), file)]).unwrap();
        let count = config
            .rules()
            .iter()
            .filter(|r| r.pattern == CONFIG_FILE_NAME)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_allowlist_layers_preserved() {
        let child: SecurityConfigFile =
            serde_json::from_str(r#"{"allowlist": ["src/**"]}"#).unwrap();
        let parent: SecurityConfigFile = serde_json::from_str(r#"{"allowlist": []}"#).unwrap();

        let config = load_from_files(vec![
            (PathBuf::from("child"), child),
            (PathBuf::from("parent"), parent),
        ])
        .unwrap();
        assert_eq!(config.allowlist_layers().len(), 2);
        assert_eq!(config.allowlist_layers()[0].entries, vec!["src/**"]);
        assert!(config.allowlist_layers()[1].entries.is_empty());
    }

    #[test]
    fn test_version_from_most_specific() {
        let child: SecurityConfigFile = serde_json::from_str(r#"{"version": "2"}"#).unwrap();
        let parent: SecurityConfigFile = serde_json::from_str(r#"{"version": "1"}"#).unwrap();

        let config = load_from_files(vec![
            (PathBuf::from("child"), child),
            (PathBuf::from("parent"), parent),
        ])
        .unwrap();
        assert_eq!(config.version(), Some("2"));
    }
}
