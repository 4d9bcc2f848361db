//! Access engine: glob rules, directory inheritance, role hierarchy,
//! symlink resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

use crate::allowlist::literal_prefix;
use crate::types::{Operation, ResolvedSecurityConfig, Rule, RuleType, role_allows};

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the operation is allowed.
    pub allowed: bool,
    /// Human-readable denial reason, present iff `allowed` is false.
    pub reason: Option<String>,
    /// Pattern of the rule that fired, for audit entries.
    pub rule: Option<String>,
}

impl AccessDecision {
    /// An allowing decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            rule: None,
        }
    }

    fn deny(reason: String, rule: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            rule,
        }
    }
}

/// How a rule matched a path.
enum MatchSource {
    /// The rule's pattern names the path itself.
    Direct,
    /// A directory rule propagated from a containing directory.
    Inherited(String),
}

/// Policy evaluator over a resolved security config.
///
/// The engine is cheap to construct and holds the config by shared
/// reference; one engine per tool invocation is the expected usage.
pub struct AccessEngine {
    config: Arc<ResolvedSecurityConfig>,
    root: Option<PathBuf>,
}

impl AccessEngine {
    /// Create an engine over a resolved config.
    #[must_use]
    pub fn new(config: Arc<ResolvedSecurityConfig>) -> Self {
        Self { config, root: None }
    }

    /// Set the project root. Absolute paths under the root are matched
    /// by their root-relative form; relative paths are resolved against
    /// the root for filesystem inspection. The root is canonicalized so
    /// resolved symlink targets strip cleanly.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.root = Some(root.canonicalize().unwrap_or(root));
        self
    }

    /// The shared config this engine evaluates against.
    #[must_use]
    pub fn config(&self) -> &Arc<ResolvedSecurityConfig> {
        &self.config
    }

    /// Check whether `role` may perform `operation` on `path`.
    ///
    /// If `path` is a symlink, both the link name and its fully
    /// resolved target are checked; a denial on either denies the
    /// access. When `role` is `None` the config's default role is
    /// assumed.
    #[must_use]
    pub fn check_access(
        &self,
        path: &Path,
        operation: Operation,
        role: Option<&str>,
    ) -> AccessDecision {
        let role = role.map_or_else(|| self.config.default_role(), ToOwned::to_owned);

        let fs_path = self.fs_path(path);
        let link_decision = self.evaluate(path, operation, &role);
        if !link_decision.allowed {
            return link_decision;
        }

        // `canonicalize` follows the whole chain and detects loops.
        if let Ok(meta) = std::fs::symlink_metadata(&fs_path) {
            if meta.file_type().is_symlink() {
                match std::fs::canonicalize(&fs_path) {
                    Ok(target) => {
                        let target_decision = self.evaluate(&target, operation, &role);
                        if !target_decision.allowed {
                            let inner = target_decision.reason.unwrap_or_default();
                            return AccessDecision::deny(
                                format!(
                                    "{} access to '{}' denied: symlink target is protected \
                                     (target '{}': {})",
                                    operation,
                                    path.display(),
                                    target.display(),
                                    inner,
                                ),
                                target_decision.rule,
                            );
                        }
                    },
                    Err(e) => {
                        debug!(
                            path = %fs_path.display(),
                            error = %e,
                            "symlink could not be resolved; checking link name only"
                        );
                    },
                }
            }
        }

        AccessDecision::allow()
    }

    /// Evaluate the rule set against one concrete path.
    fn evaluate(&self, path: &Path, operation: Operation, role: &str) -> AccessDecision {
        let normalized = self.match_str(path);
        let parents = parent_dirs(&normalized);

        let mut direct: Vec<(&Rule, MatchSource)> = Vec::new();
        let mut inherited: Vec<(&Rule, MatchSource)> = Vec::new();

        for rule in self.config.rules() {
            if !rule.denied_operations.contains(&operation) {
                continue;
            }
            match rule.rule_type {
                RuleType::File => {
                    if file_rule_matches(&rule.pattern, &normalized) {
                        direct.push((rule, MatchSource::Direct));
                    }
                },
                RuleType::Directory => match classify_directory_match(
                    &rule.pattern,
                    &normalized,
                    &parents,
                ) {
                    Some(MatchSource::Direct) => direct.push((rule, MatchSource::Direct)),
                    Some(source @ MatchSource::Inherited(_)) => inherited.push((rule, source)),
                    None => {},
                },
            }
        }

        for (rule, source) in direct.into_iter().chain(inherited) {
            if role_allows(&self.config, role, &rule.allowed_roles) {
                continue;
            }
            let roles = if rule.allowed_roles.is_empty() {
                "none".to_owned()
            } else {
                rule.allowed_roles.join(", ")
            };
            let via = match source {
                MatchSource::Direct => String::new(),
                MatchSource::Inherited(parent) => format!(" inherited from '{parent}'"),
            };
            return AccessDecision::deny(
                format!(
                    "{operation} access to '{normalized}' denied by rule '{}'{via} \
                     (allowed roles: {roles})",
                    rule.pattern,
                ),
                Some(rule.pattern.clone()),
            );
        }

        AccessDecision::allow()
    }

    /// Resolve a path for filesystem inspection.
    fn fs_path(&self, path: &Path) -> PathBuf {
        match (&self.root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Normalize a path for pattern matching: root-relative when
    /// possible, forward slashes always.
    fn match_str(&self, path: &Path) -> String {
        let relative = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        relative.to_string_lossy().replace('\\', "/")
    }
}

/// Match a file rule against the full path and its basename.
fn file_rule_matches(pattern: &str, path: &str) -> bool {
    let Some(matcher) = compile(pattern) else {
        return false;
    };
    if matcher.is_match(path) {
        return true;
    }
    path.rsplit('/')
        .next()
        .is_some_and(|basename| matcher.is_match(basename))
}

/// Match a directory rule against one candidate path.
///
/// A candidate matches when (a) it begins with the pattern's
/// non-wildcard prefix, (b) the glob matches it, or (c) the glob
/// `{pattern}/**` matches it.
fn directory_rule_matches(pattern: &str, candidate: &str) -> bool {
    if let Some(prefix) = literal_prefix(pattern) {
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty()
            && (candidate == trimmed || candidate.starts_with(&format!("{trimmed}/")))
        {
            return true;
        }
    }
    if compile(pattern).is_some_and(|m| m.is_match(candidate)) {
        return true;
    }
    let descend = format!("{}/**", pattern.trim_end_matches('/'));
    compile(&descend).is_some_and(|m| m.is_match(candidate))
}

/// Decide whether a directory rule matches `path` directly or through
/// a containing directory.
///
/// The rule names a directory; the directory itself matches directly,
/// while anything inside it inherits the rule from the nearest
/// matching parent.
fn classify_directory_match(
    pattern: &str,
    path: &str,
    parents: &[String],
) -> Option<MatchSource> {
    let trimmed = literal_prefix(pattern).map(|p| p.trim_end_matches('/').to_owned());
    if trimmed.as_deref() == Some(path) {
        return Some(MatchSource::Direct);
    }
    for parent in parents {
        if directory_rule_matches(pattern, parent) {
            return Some(MatchSource::Inherited(parent.clone()));
        }
    }
    if directory_rule_matches(pattern, path) {
        return Some(MatchSource::Direct);
    }
    None
}

/// Every parent directory of a normalized path, nearest first, root
/// excluded.
fn parent_dirs(path: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if current.is_empty() || current == "/" {
            break;
        }
        parents.push(current.to_owned());
    }
    parents
}

fn compile(pattern: &str) -> Option<GlobMatcher> {
    match Glob::new(pattern) {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!(pattern, error = %e, "failed to compile glob pattern");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, Rule};
    use tempfile::TempDir;

    fn config(roles: Vec<Role>, rules: Vec<Rule>) -> Arc<ResolvedSecurityConfig> {
        Arc::new(ResolvedSecurityConfig::new(
            None,
            roles,
            rules,
            vec![],
            vec![],
            None,
            None,
            None,
            vec![],
        ))
    }

    fn secrets_dir_rule() -> Rule {
        Rule {
            pattern: "secrets/**".to_owned(),
            rule_type: RuleType::Directory,
            denied_operations: vec![Operation::Read],
            allowed_roles: vec!["admin".to_owned()],
        }
    }

    fn roles() -> Vec<Role> {
        vec![
            Role {
                name: "admin".to_owned(),
                level: 10,
            },
            Role {
                name: "viewer".to_owned(),
                level: 1,
            },
        ]
    }

    #[test]
    fn test_directory_rule_inherited_for_nested_path() {
        let engine = AccessEngine::new(config(roles(), vec![secrets_dir_rule()]));

        let decision = engine.check_access(
            Path::new("secrets/nested/x.txt"),
            Operation::Read,
            Some("viewer"),
        );
        assert!(!decision.allowed);
        let reason = decision.reason.unwrap();
        assert!(reason.contains("inherited"), "reason was: {reason}");
        assert!(reason.contains("secrets/**"));
    }

    #[test]
    fn test_admin_escapes_denial() {
        let engine = AccessEngine::new(config(roles(), vec![secrets_dir_rule()]));

        let decision = engine.check_access(
            Path::new("secrets/nested/x.txt"),
            Operation::Read,
            Some("admin"),
        );
        assert!(decision.allowed);
    }

    #[test]
    fn test_higher_level_dominates() {
        // Property: anything a lower role may do, a strictly higher
        // role may do as well.
        let mut all_roles = roles();
        all_roles.push(Role {
            name: "root".to_owned(),
            level: 100,
        });
        let engine = AccessEngine::new(config(all_roles, vec![secrets_dir_rule()]));

        let path = Path::new("secrets/x.txt");
        let admin = engine.check_access(path, Operation::Read, Some("admin"));
        let root = engine.check_access(path, Operation::Read, Some("root"));
        assert!(admin.allowed);
        assert!(root.allowed);
    }

    #[test]
    fn test_unrelated_operation_allowed() {
        let engine = AccessEngine::new(config(roles(), vec![secrets_dir_rule()]));
        let decision = engine.check_access(
            Path::new("secrets/x.txt"),
            Operation::Write,
            Some("viewer"),
        );
        assert!(decision.allowed);
    }

    #[test]
    fn test_file_rule_matches_basename_anywhere() {
        let rule = Rule {
            pattern: ".env".to_owned(),
            rule_type: RuleType::File,
            denied_operations: vec![Operation::Read, Operation::Llm],
            allowed_roles: vec![],
        };
        let engine = AccessEngine::new(config(roles(), vec![rule]));

        let decision =
            engine.check_access(Path::new("deploy/prod/.env"), Operation::Llm, Some("admin"));
        assert!(!decision.allowed);
        // Empty allowedRoles exempts nobody, not even admin.
        assert!(decision.reason.unwrap().contains("allowed roles: none"));
    }

    #[test]
    fn test_default_role_is_lowest() {
        let engine = AccessEngine::new(config(roles(), vec![secrets_dir_rule()]));
        // No role supplied: the lowest-level role (viewer) applies.
        let decision = engine.check_access(Path::new("secrets/x.txt"), Operation::Read, None);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_symlink_target_protected() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("secrets")).unwrap();
        std::fs::write(tmp.path().join("secrets/file"), "top secret").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(tmp.path().join("secrets/file"), tmp.path().join("link"))
            .unwrap();

        #[cfg(unix)]
        {
            let engine =
                AccessEngine::new(config(roles(), vec![secrets_dir_rule()])).with_root(tmp.path());
            let decision = engine.check_access(Path::new("link"), Operation::Read, Some("viewer"));
            assert!(!decision.allowed);
            let reason = decision.reason.unwrap();
            assert!(
                reason.contains("symlink target is protected"),
                "reason was: {reason}"
            );
        }
    }

    #[test]
    fn test_symlink_with_allowed_target() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("plain.txt"), "ok").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(tmp.path().join("plain.txt"), tmp.path().join("link"))
                .unwrap();
            let engine =
                AccessEngine::new(config(roles(), vec![secrets_dir_rule()])).with_root(tmp.path());
            let decision = engine.check_access(Path::new("link"), Operation::Read, Some("viewer"));
            assert!(decision.allowed);
        }
    }

    #[test]
    fn test_parent_dirs() {
        assert_eq!(
            parent_dirs("a/b/c.txt"),
            vec!["a/b".to_owned(), "a".to_owned()]
        );
        assert_eq!(parent_dirs("/x/y"), vec!["/x".to_owned()]);
        assert!(parent_dirs("file.txt").is_empty());
    }

    #[test]
    fn test_directory_pattern_without_wildcard() {
        let rule = Rule {
            pattern: "vendor".to_owned(),
            rule_type: RuleType::Directory,
            denied_operations: vec![Operation::Write],
            allowed_roles: vec![],
        };
        let engine = AccessEngine::new(config(roles(), vec![rule]));

        let nested = engine.check_access(
            Path::new("vendor/lib/code.rs"),
            Operation::Write,
            Some("viewer"),
        );
        assert!(!nested.allowed);
        assert!(nested.reason.unwrap().contains("inherited"));

        let itself = engine.check_access(Path::new("vendor"), Operation::Write, Some("viewer"));
        assert!(!itself.allowed);
        assert!(!itself.reason.unwrap().contains("inherited"));
    }
}
