//! `opencode security` subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use opencode_audit::{AuditLogReader, AuditLogger, AuditLogEntry, DEFAULT_LOG_FILE};
use opencode_security::{
    AccessEngine, CONFIG_FILE_NAME, Operation, PRIVATE_KEY_FILE_NAME, issue_role_token, load,
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::theme::Theme;

/// Starter configuration written by `security init`.
const TEMPLATE_CONFIG: &str = r#"{
  "version": "1",
  "roles": [
    { "name": "admin", "level": 10 },
    { "name": "developer", "level": 5 },
    { "name": "viewer", "level": 1 }
  ],
  "rules": [
    {
      "pattern": "secrets/**",
      "type": "directory",
      "deniedOperations": ["read", "write", "llm"],
      "allowedRoles": ["admin"]
    },
    {
      "pattern": ".env",
      "type": "file",
      "deniedOperations": ["read", "llm"],
      "allowedRoles": ["admin"]
    }
  ],
  "segments": {
    "markers": [
      {
        "start": "SECURITY-START",
        "end": "SECURITY-END",
        "deniedOperations": ["read", "llm"],
        "allowedRoles": ["admin"]
      }
    ],
    "ast": []
  }
}
"#;

/// Show the resolved configuration.
pub(crate) fn status(dir: &Path) -> Result<()> {
    let config = load(dir)?;

    println!("\n{}", Theme::header("Security Status"));
    match config.version() {
        Some(version) => println!("  version:   {version}"),
        None => println!("  version:   {}", Theme::dimmed("(none)")),
    }

    println!("\n{}", Theme::header("Roles"));
    if config.roles().is_empty() {
        println!("  {}", Theme::dimmed("none configured"));
    }
    for role in config.roles() {
        println!("  {:<12} level {}", role.name, role.level);
    }

    println!("\n{}", Theme::header("Rules"));
    for rule in config.rules() {
        let ops: Vec<String> = rule
            .denied_operations
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "  {:<32} deny [{}] unless [{}]",
            rule.pattern,
            ops.join(", "),
            rule.allowed_roles.join(", ")
        );
    }

    println!("\n{}", Theme::header("Segments"));
    println!(
        "  {} marker rule(s), {} ast rule(s)",
        config.markers().len(),
        config.ast_rules().len()
    );

    println!("\n{}", Theme::header("MCP"));
    for server in ["websearch", "context7", "grep_app"] {
        println!("  {:<12} {}", server, config.get_mcp_policy(server));
    }

    if !config.allowlist_layers().is_empty() {
        println!("\n{}", Theme::header("LLM Allowlist"));
        for layer in config.allowlist_layers() {
            println!(
                "  {} ({} entries)",
                layer.source.display(),
                layer.entries.len()
            );
        }
    }

    println!();
    Ok(())
}

/// Evaluate one access and print the decision.
pub(crate) fn check(dir: &Path, path: &Path, operation: &str, role: Option<&str>) -> Result<()> {
    let operation = parse_operation(operation)?;
    let config = load(dir)?;
    let engine = AccessEngine::new(config.clone()).with_root(dir);

    let role_name = role.map_or_else(|| config.default_role(), ToOwned::to_owned);
    let decision = engine.check_access(path, operation, Some(&role_name));

    let logger = AuditLogger::new(dir.join(audit_log_name(&config)));
    let mut entry = AuditLogEntry::new(
        &role_name,
        operation.to_string(),
        path.display().to_string(),
        decision.allowed,
    );
    if let Some(reason) = &decision.reason {
        entry = entry.with_reason(reason);
    }
    if let Some(rule) = &decision.rule {
        entry = entry.with_rule(rule);
    }
    logger.log(&entry);

    if decision.allowed {
        println!(
            "{}",
            Theme::success(&format!(
                "{operation} access to '{}' allowed for role '{role_name}'",
                path.display()
            ))
        );
    } else {
        println!(
            "{}",
            Theme::error(&decision.reason.unwrap_or_else(|| "denied".to_owned()))
        );
    }
    Ok(())
}

/// Write the starter config. Refuses to overwrite.
pub(crate) fn init(dir: &Path) -> Result<()> {
    let target = dir.join(CONFIG_FILE_NAME);
    if target.exists() {
        println!(
            "{}",
            Theme::error(&format!("{} already exists", target.display()))
        );
        std::process::exit(1);
    }

    std::fs::write(&target, TEMPLATE_CONFIG)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!(
        "{}",
        Theme::success(&format!("wrote {}", target.display()))
    );
    println!(
        "{}",
        Theme::info("edit roles and rules, then verify with `opencode security status`")
    );
    Ok(())
}

/// Render the audit log.
pub(crate) fn logs(dir: &Path, tail: usize, filter: Option<&str>) -> Result<()> {
    let config = load(dir)?;
    let reader = AuditLogReader::new(dir.join(audit_log_name(&config)));
    let denied_only = filter == Some("denied");
    let entries = reader.tail(tail, denied_only)?;

    if entries.is_empty() {
        println!("{}", Theme::dimmed("no audit entries"));
        return Ok(());
    }

    for entry in entries {
        let marker = match entry.result {
            opencode_audit::AccessOutcome::Allowed => Theme::success("allowed"),
            opencode_audit::AccessOutcome::Denied => Theme::error("denied"),
        };
        println!(
            "{} {} {:<5} {} {}",
            Theme::dimmed(&entry.timestamp.to_rfc3339()),
            marker,
            entry.operation,
            entry.path,
            entry
                .reason
                .map(|r| Theme::dimmed(&format!("({r})")))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

/// Generate the RS256 keypair. Refuses to overwrite.
pub(crate) fn init_keys(dir: &Path) -> Result<()> {
    let key_path = dir.join(PRIVATE_KEY_FILE_NAME);
    if key_path.exists() {
        println!(
            "{}",
            Theme::error(&format!("{} already exists", key_path.display()))
        );
        std::process::exit(1);
    }

    println!("{}", Theme::info("generating 2048-bit RSA keypair..."));
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).context("key generation failed")?;
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .context("failed to encode private key")?;
    let public_pem = RsaPublicKey::from(&private)
        .to_public_key_pem(LineEnding::LF)
        .context("failed to encode public key")?;

    std::fs::write(&key_path, private_pem.as_bytes())
        .with_context(|| format!("failed to write {}", key_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    println!(
        "{}",
        Theme::success(&format!("wrote {}", key_path.display()))
    );
    println!(
        "\n{}",
        Theme::info("add this public key to authentication.publicKey:")
    );
    println!("{public_pem}");
    Ok(())
}

/// Issue a signed role token.
pub(crate) fn issue_token(
    dir: &Path,
    role: &str,
    expires_days: i64,
    project: Option<&str>,
) -> Result<()> {
    let key_path = dir.join(PRIVATE_KEY_FILE_NAME);
    let Ok(private_pem) = std::fs::read(&key_path) else {
        println!(
            "{}",
            Theme::error(&format!(
                "no private key at {}; run `opencode security init-keys` first",
                key_path.display()
            ))
        );
        std::process::exit(1);
    };

    let token = issue_role_token(
        &private_pem,
        role,
        chrono::Duration::days(expires_days),
        project,
    )?;

    println!(
        "{}",
        Theme::success(&format!("token for role '{role}' ({expires_days} day(s)):"))
    );
    println!("{token}");
    Ok(())
}

fn parse_operation(operation: &str) -> Result<Operation> {
    match operation {
        "read" => Ok(Operation::Read),
        "write" => Ok(Operation::Write),
        "llm" => Ok(Operation::Llm),
        other => anyhow::bail!("unknown operation '{other}' (expected read, write, or llm)"),
    }
}

fn audit_log_name(config: &opencode_security::ResolvedSecurityConfig) -> std::path::PathBuf {
    config
        .logging()
        .and_then(|l| l.path.clone())
        .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_LOG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_config_is_loadable() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), TEMPLATE_CONFIG).unwrap();

        let config = load(tmp.path()).unwrap();
        assert_eq!(config.roles().len(), 3);
        assert_eq!(config.default_role(), "viewer");
        assert!(config.has_protections());
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!(parse_operation("llm").unwrap(), Operation::Llm);
        assert!(parse_operation("execute").is_err());
    }

    #[test]
    fn test_check_appends_audit_entry() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), TEMPLATE_CONFIG).unwrap();

        check(tmp.path(), Path::new("secrets/k.pem"), "read", Some("viewer")).unwrap();

        let reader = AuditLogReader::new(tmp.path().join(DEFAULT_LOG_FILE));
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, opencode_audit::AccessOutcome::Denied);
    }
}
