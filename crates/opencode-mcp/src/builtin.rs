//! The three built-in remote servers and their resolution rules.

use std::collections::HashMap;

use opencode_security::{McpPolicy, ResolvedSecurityConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client configuration for a remote MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpRemoteConfig {
    /// Remote endpoint URL.
    pub url: String,
    /// HTTP headers carrying the credential.
    pub headers: HashMap<String, String>,
    /// OAuth flow toggle. Always disabled for built-ins.
    pub oauth: bool,
}

/// A pre-declared remote MCP server.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinMcpServer {
    /// Server name (part of the external contract).
    pub name: &'static str,
    /// Human description.
    pub description: &'static str,
    /// Environment variable holding the API key.
    pub env_var: &'static str,
    url: &'static str,
    header: &'static str,
    bearer: bool,
}

impl BuiltinMcpServer {
    /// Build the client config for this server with the given key.
    #[must_use]
    pub fn config(&self, api_key: &str) -> McpRemoteConfig {
        let value = if self.bearer {
            format!("Bearer {api_key}")
        } else {
            api_key.to_owned()
        };
        McpRemoteConfig {
            url: self.url.to_owned(),
            headers: HashMap::from([(self.header.to_owned(), value)]),
            oauth: false,
        }
    }
}

/// The built-in inventory. Names, env vars, endpoints, and header
/// shapes are all part of the external contract.
pub const BUILTIN_SERVERS: [BuiltinMcpServer; 3] = [
    BuiltinMcpServer {
        name: "websearch",
        description: "Web search via the Exa MCP endpoint",
        env_var: "EXA_API_KEY",
        url: "https://mcp.exa.ai/mcp",
        header: "x-api-key",
        bearer: false,
    },
    BuiltinMcpServer {
        name: "context7",
        description: "Library documentation lookup via Context7",
        env_var: "CONTEXT7_API_KEY",
        url: "https://mcp.context7.com/mcp",
        header: "Authorization",
        bearer: true,
    },
    BuiltinMcpServer {
        name: "grep_app",
        description: "Cross-repo code search via grep.app",
        env_var: "GREP_APP_API_KEY",
        url: "https://mcp.grep.app/mcp",
        header: "Authorization",
        bearer: true,
    },
];

/// Caller-supplied context for resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Server names the user already configured; built-ins never
    /// shadow these.
    pub existing_servers: Vec<String>,
    /// Built-in names the caller disabled.
    pub disabled_mcps: Vec<String>,
    /// Explicit API keys by env var name; beats the process
    /// environment.
    pub api_keys: HashMap<String, String>,
}

/// Resolve the enabled built-in servers against the process
/// environment.
#[must_use]
pub fn resolve_builtin_servers(
    config: &ResolvedSecurityConfig,
    options: &ResolveOptions,
) -> HashMap<String, McpRemoteConfig> {
    resolve_with_env(config, options, |var| std::env::var(var).ok())
}

/// Resolution with an explicit environment lookup (test seam).
///
/// Skip order per server: an existing user-configured server under the
/// same name, the caller's disabled list, a `blocked` policy, then key
/// lookup (explicit keys beat the environment; neither present skips
/// the server).
pub fn resolve_with_env(
    config: &ResolvedSecurityConfig,
    options: &ResolveOptions,
    env: impl Fn(&str) -> Option<String>,
) -> HashMap<String, McpRemoteConfig> {
    let mut resolved = HashMap::new();

    for server in &BUILTIN_SERVERS {
        if options.existing_servers.iter().any(|s| s == server.name) {
            debug!(server = server.name, "skipping built-in: user-configured");
            continue;
        }
        if options.disabled_mcps.iter().any(|s| s == server.name) {
            debug!(server = server.name, "skipping built-in: disabled");
            continue;
        }
        if config.get_mcp_policy(server.name) == McpPolicy::Blocked {
            debug!(server = server.name, "skipping built-in: blocked by policy");
            continue;
        }
        let key = options
            .api_keys
            .get(server.env_var)
            .cloned()
            .or_else(|| env(server.env_var));
        let Some(key) = key else {
            debug!(server = server.name, "skipping built-in: no api key");
            continue;
        };

        resolved.insert(server.name.to_owned(), server.config(&key));
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> ResolvedSecurityConfig {
        ResolvedSecurityConfig::new(None, vec![], vec![], vec![], vec![], None, None, None, vec![])
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_resolves_with_explicit_key() {
        let options = ResolveOptions {
            api_keys: HashMap::from([("EXA_API_KEY".to_owned(), "k-123".to_owned())]),
            ..Default::default()
        };

        let resolved = resolve_with_env(&empty_config(), &options, no_env);
        assert_eq!(resolved.len(), 1);

        let websearch = &resolved["websearch"];
        assert_eq!(websearch.url, "https://mcp.exa.ai/mcp");
        assert_eq!(websearch.headers["x-api-key"], "k-123");
        assert!(!websearch.oauth);
    }

    #[test]
    fn test_bearer_headers() {
        let options = ResolveOptions {
            api_keys: HashMap::from([
                ("CONTEXT7_API_KEY".to_owned(), "c7".to_owned()),
                ("GREP_APP_API_KEY".to_owned(), "ga".to_owned()),
            ]),
            ..Default::default()
        };

        let resolved = resolve_with_env(&empty_config(), &options, no_env);
        assert_eq!(resolved["context7"].headers["Authorization"], "Bearer c7");
        assert_eq!(resolved["grep_app"].headers["Authorization"], "Bearer ga");
    }

    #[test]
    fn test_explicit_key_beats_environment() {
        let options = ResolveOptions {
            api_keys: HashMap::from([("EXA_API_KEY".to_owned(), "explicit".to_owned())]),
            ..Default::default()
        };

        let resolved =
            resolve_with_env(&empty_config(), &options, |_| Some("from-env".to_owned()));
        assert_eq!(resolved["websearch"].headers["x-api-key"], "explicit");
    }

    #[test]
    fn test_environment_fallback() {
        let resolved =
            resolve_with_env(&empty_config(), &ResolveOptions::default(), |var| {
                (var == "EXA_API_KEY").then(|| "env-key".to_owned())
            });
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["websearch"].headers["x-api-key"], "env-key");
    }

    #[test]
    fn test_missing_key_skips_server() {
        let resolved = resolve_with_env(&empty_config(), &ResolveOptions::default(), no_env);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_user_configured_name_wins() {
        let options = ResolveOptions {
            existing_servers: vec!["websearch".to_owned()],
            api_keys: HashMap::from([("EXA_API_KEY".to_owned(), "k".to_owned())]),
            ..Default::default()
        };
        let resolved = resolve_with_env(&empty_config(), &options, no_env);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_disabled_list_skips_server() {
        let options = ResolveOptions {
            disabled_mcps: vec!["websearch".to_owned()],
            api_keys: HashMap::from([("EXA_API_KEY".to_owned(), "k".to_owned())]),
            ..Default::default()
        };
        let resolved = resolve_with_env(&empty_config(), &options, no_env);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_blocked_policy_skips_server() {
        let config: ResolvedSecurityConfig = {
            let file: opencode_security::SecurityConfigFile = serde_json::from_str(
                r#"{"mcp": {"servers": {"websearch": "blocked"}}}"#,
            )
            .unwrap();
            opencode_security::load_from_files(vec![(std::path::PathBuf::from("x"), file)])
                .unwrap()
        };
        let options = ResolveOptions {
            api_keys: HashMap::from([("EXA_API_KEY".to_owned(), "k".to_owned())]),
            ..Default::default()
        };
        let resolved = resolve_with_env(&config, &options, no_env);
        assert!(resolved.is_empty());
    }
}
