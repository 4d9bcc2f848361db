//! opencode security CLI.
//!
//! Thin rendering layer over the security engine: inspect the resolved
//! config, check a path, bootstrap config and keys, read the audit
//! log, and issue role tokens.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod theme;

use commands::security;

/// opencode — agent delegation core
#[derive(Parser)]
#[command(name = "opencode")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage the security configuration
    Security {
        #[command(subcommand)]
        command: SecurityCommands,
    },
}

#[derive(Subcommand)]
enum SecurityCommands {
    /// Show the resolved security configuration
    Status,

    /// Check whether an operation on a path would be allowed
    Check {
        /// Path to check
        path: PathBuf,

        /// Operation: read, write, or llm
        #[arg(long, default_value = "read")]
        operation: String,

        /// Role to check as (defaults to the lowest configured role)
        #[arg(long)]
        role: Option<String>,
    },

    /// Write a starter .opencode-security.json
    Init,

    /// Show the audit log
    Logs {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        tail: usize,

        /// Filter: "denied" shows denials only
        #[arg(long)]
        filter: Option<String>,
    },

    /// Generate the RS256 keypair for role tokens
    InitKeys,

    /// Issue a signed role token
    IssueToken {
        /// Role the token grants
        #[arg(long)]
        role: String,

        /// Token validity in days
        #[arg(long, default_value_t = 30)]
        expires_days: i64,

        /// Optional project scope
        #[arg(long)]
        project: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Security { command } => match command {
            SecurityCommands::Status => security::status(&dir),
            SecurityCommands::Check {
                path,
                operation,
                role,
            } => security::check(&dir, &path, &operation, role.as_deref()),
            SecurityCommands::Init => security::init(&dir),
            SecurityCommands::Logs { tail, filter } => {
                security::logs(&dir, tail, filter.as_deref())
            },
            SecurityCommands::InitKeys => security::init_keys(&dir),
            SecurityCommands::IssueToken {
                role,
                expires_days,
                project,
            } => security::issue_token(&dir, &role, expires_days, project.as_deref()),
        },
    }
}
