//! Schema types for `.opencode-security.json` and the resolved config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Name of the per-directory security config file.
pub const CONFIG_FILE_NAME: &str = ".opencode-security.json";

/// Default name of the audit log file.
pub const AUDIT_LOG_FILE_NAME: &str = ".opencode-security-audit.log";

/// Operations gated by the security engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Reading file content.
    Read,
    /// Writing or replacing file content.
    Write,
    /// Shipping file content to an LLM.
    Llm,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Llm => write!(f, "llm"),
        }
    }
}

/// Whether a rule pattern names files or directory subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Pattern matches individual files.
    File,
    /// Pattern matches a directory; contained paths inherit the rule.
    Directory,
}

/// A named privilege level. Higher level = more privilege; roles are
/// ordered by level only, names carry no hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name.
    pub name: String,
    /// Privilege level.
    pub level: i64,
}

/// A single access rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Glob pattern the rule applies to.
    pub pattern: String,
    /// File or directory semantics.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Operations denied when the rule matches.
    #[serde(rename = "deniedOperations", default)]
    pub denied_operations: Vec<Operation>,
    /// Roles exempt from the denial. An empty list exempts nobody.
    #[serde(rename = "allowedRoles", default)]
    pub allowed_roles: Vec<String>,
}

/// A commented marker pair bounding a protected region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Start token (matched inside any of six comment syntaxes).
    pub start: String,
    /// End token.
    pub end: String,
    /// Operations denied inside the region.
    #[serde(rename = "deniedOperations", default)]
    pub denied_operations: Vec<Operation>,
    /// Roles exempt from the denial.
    #[serde(rename = "allowedRoles", default)]
    pub allowed_roles: Vec<String>,
}

/// AST node selection treated as a protected region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstRuleConfig {
    /// Languages the rule applies to.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Node types to inspect (e.g. `function_declaration`).
    #[serde(rename = "nodeTypes", default)]
    pub node_types: Vec<String>,
    /// Regex the node's name attribute must match.
    #[serde(rename = "namePattern")]
    pub name_pattern: String,
    /// Operations denied inside matching nodes.
    #[serde(rename = "deniedOperations", default)]
    pub denied_operations: Vec<Operation>,
    /// Roles exempt from the denial.
    #[serde(rename = "allowedRoles", default)]
    pub allowed_roles: Vec<String>,
}

/// The `segments` section of a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentsSection {
    /// Marker-delimited regions.
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
    /// AST-selected regions.
    #[serde(default)]
    pub ast: Vec<AstRuleConfig>,
}

impl SegmentsSection {
    /// Whether no segment rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.ast.is_empty()
    }
}

/// Audit log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Log every evaluated access.
    Verbose,
    /// Log denials and notable events only.
    Normal,
}

/// The `logging` section of a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Audit log path, relative to the project root.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Verbosity.
    #[serde(default)]
    pub level: Option<LogLevel>,
    /// Size cap before rotation, in megabytes.
    #[serde(rename = "maxSizeMB", default)]
    pub max_size_mb: Option<u64>,
    /// Days to retain rotated logs.
    #[serde(rename = "retentionDays", default)]
    pub retention_days: Option<u64>,
}

/// The `authentication` section of a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// PEM-encoded RSA public key for verifying role tokens.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Revoked token IDs (`jti` claims).
    #[serde(rename = "revokedTokens", default)]
    pub revoked_tokens: Vec<String>,
}

/// Enforcement policy for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpPolicy {
    /// Server output is passed through unchecked.
    Trusted,
    /// Server output traverses the security pipeline.
    Enforced,
    /// Server is not started at all.
    Blocked,
}

impl McpPolicy {
    /// Restriction priority: `blocked > enforced > trusted`.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Trusted => 0,
            Self::Enforced => 1,
            Self::Blocked => 2,
        }
    }

    /// Merge two policies, keeping the most restrictive.
    #[must_use]
    pub fn most_restrictive(self, other: Self) -> Self {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for McpPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trusted => write!(f, "trusted"),
            Self::Enforced => write!(f, "enforced"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// The `mcp` section of a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSection {
    /// Policy applied to servers without an explicit entry.
    #[serde(rename = "defaultPolicy", default)]
    pub default_policy: Option<McpPolicy>,
    /// Per-server policies.
    #[serde(default)]
    pub servers: HashMap<String, McpPolicy>,
}

/// One `.opencode-security.json` file, as parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfigFile {
    /// Schema version.
    #[serde(default)]
    pub version: Option<String>,
    /// Role definitions.
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
    /// Access rules.
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
    /// In-file protected segments.
    #[serde(default)]
    pub segments: Option<SegmentsSection>,
    /// Audit logging settings.
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Role-token authentication settings.
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
    /// MCP server policies.
    #[serde(default)]
    pub mcp: Option<McpSection>,
    /// LLM path allowlist.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
}

/// One allowlist layer, tagged with the file that defined it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistLayer {
    /// The config file this layer came from.
    pub source: PathBuf,
    /// Allowlist entries (glob patterns).
    pub entries: Vec<String>,
}

/// The merged, immutable security configuration.
///
/// Constructed once by the loader and shared as an
/// `Arc<ResolvedSecurityConfig>`. All fields are reachable through
/// read-only accessors only; delegated children inherit the parent's
/// snapshot by `Arc` identity and cannot alter it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSecurityConfig {
    version: Option<String>,
    roles: Vec<Role>,
    rules: Vec<Rule>,
    markers: Vec<MarkerConfig>,
    ast: Vec<AstRuleConfig>,
    logging: Option<LoggingConfig>,
    authentication: Option<AuthenticationConfig>,
    mcp: Option<McpSection>,
    resolved_allowlist: Vec<AllowlistLayer>,
    /// Whether the user configured any rules or segments. The implicit
    /// self-protection rules appended below do not count.
    user_protections: bool,
}

impl ResolvedSecurityConfig {
    /// Assemble a resolved config. Only the loader (and tests) build
    /// these; everything downstream receives a shared `Arc`.
    ///
    /// File rules denying `write` on the config and audit log files are
    /// appended automatically unless equivalent rules are present.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: Option<String>,
        roles: Vec<Role>,
        mut rules: Vec<Rule>,
        markers: Vec<MarkerConfig>,
        ast: Vec<AstRuleConfig>,
        logging: Option<LoggingConfig>,
        authentication: Option<AuthenticationConfig>,
        mcp: Option<McpSection>,
        resolved_allowlist: Vec<AllowlistLayer>,
    ) -> Self {
        let user_protections = !rules.is_empty() || !markers.is_empty() || !ast.is_empty();

        for name in [CONFIG_FILE_NAME, AUDIT_LOG_FILE_NAME] {
            if rules.iter().any(|r| r.pattern == name) {
                continue;
            }
            rules.push(Rule {
                pattern: name.to_owned(),
                rule_type: RuleType::File,
                denied_operations: vec![Operation::Write],
                allowed_roles: vec![],
            });
        }

        Self {
            version,
            roles,
            rules,
            markers,
            ast,
            logging,
            authentication,
            mcp,
            resolved_allowlist,
            user_protections,
        }
    }

    /// Schema version from the most specific file.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Merged role definitions.
    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Merged access rules, most specific first.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Merged marker segment rules.
    #[must_use]
    pub fn markers(&self) -> &[MarkerConfig] {
        &self.markers
    }

    /// Merged AST segment rules.
    #[must_use]
    pub fn ast_rules(&self) -> &[AstRuleConfig] {
        &self.ast
    }

    /// Logging settings (first defined wins during merge).
    #[must_use]
    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.logging.as_ref()
    }

    /// Authentication settings (first defined wins during merge).
    #[must_use]
    pub fn authentication(&self) -> Option<&AuthenticationConfig> {
        self.authentication.as_ref()
    }

    /// Allowlist layers in discovery order.
    #[must_use]
    pub fn allowlist_layers(&self) -> &[AllowlistLayer] {
        &self.resolved_allowlist
    }

    /// Whether the user configured any rules or segments (the
    /// implicit self-protection rules do not count).
    #[must_use]
    pub fn has_protections(&self) -> bool {
        self.user_protections
    }

    /// Look up a role's level by name.
    #[must_use]
    pub fn role_level(&self, name: &str) -> Option<i64> {
        self.roles.iter().find(|r| r.name == name).map(|r| r.level)
    }

    /// The role assumed when a caller supplies none: the lowest-level
    /// configured role, or `viewer` if no roles are defined.
    #[must_use]
    pub fn default_role(&self) -> String {
        self.roles
            .iter()
            .min_by_key(|r| r.level)
            .map_or_else(|| "viewer".to_owned(), |r| r.name.clone())
    }

    /// Effective policy for an MCP server.
    ///
    /// An explicit per-server entry wins, then the configured default.
    /// Without an `mcp` section the default is `enforced` when any
    /// rules or segments exist, `trusted` otherwise.
    #[must_use]
    pub fn get_mcp_policy(&self, server: &str) -> McpPolicy {
        if let Some(mcp) = &self.mcp {
            if let Some(policy) = mcp.servers.get(server) {
                return *policy;
            }
            if let Some(default) = mcp.default_policy {
                return default;
            }
        }
        if self.has_protections() {
            McpPolicy::Enforced
        } else {
            McpPolicy::Trusted
        }
    }
}

/// Whether `role` escapes a denial restricted to `allowed_roles`.
///
/// True iff the role is a member, or its configured level is strictly
/// greater than every member's level. An empty member list exempts
/// nobody, and members without a configured level cannot be outranked.
#[must_use]
pub fn role_allows(config: &ResolvedSecurityConfig, role: &str, allowed_roles: &[String]) -> bool {
    if allowed_roles.iter().any(|r| r == role) {
        return true;
    }
    let Some(level) = config.role_level(role) else {
        return false;
    };
    let member_levels: Vec<i64> = allowed_roles
        .iter()
        .filter_map(|r| config.role_level(r))
        .collect();
    if member_levels.is_empty() || member_levels.len() < allowed_roles.len() {
        return false;
    }
    member_levels.iter().all(|&m| level > m)
}
