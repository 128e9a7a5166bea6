//! # Shellblock MCP Server
//!
//! Model Context Protocol server that lets AI agents drive interactive zsh
//! sessions and read their output as command and output blocks.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Session management (create, list, label, delete)
//! - Command execution (execute, run and wait)
//! - Interaction with running commands (send keys, enter root password)
//! - Reading output (read blocks, snapshot)
//!
//! ## Architecture
//!
//! This is Layer 1 - the main MCP server binary that ties together:
//! - shellblock-core: Core types and configuration
//! - shellblock-engine: Marker codec and block segmentation
//! - shellblock-session: Shell processes and the session registry

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use rmcp::{transport::stdio, ServiceExt};
use shellblock_core::ServerConfig;
use shellblock_mcp::ShellblockServer;
use shellblock_session::{Credential, SessionRegistry};

const PASSWORD_ENV: &str = "SHELLBLOCK_ROOT_PASSWORD";

const USAGE: &str = "\
Usage: shellblock-mcp [OPTIONS]

Options:
  --config <PATH>          Load configuration from a YAML file
  --root-password <PASS>   Password for elevated sessions (or set SHELLBLOCK_ROOT_PASSWORD)
  --shell <PROGRAM>        Shell program to run (default: zsh)
  -h, --help               Print this help";

/// Command line options.
#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    config: Option<PathBuf>,
    root_password: Option<String>,
    shell: Option<String>,
    help: bool,
}

impl CliArgs {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .with_context(|| format!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--root-password" => parsed.root_password = Some(value()?),
                "--shell" => parsed.shell = Some(value()?),
                "-h" | "--help" => parsed.help = true,
                other => bail!("Unknown argument: {other}\n\n{USAGE}"),
            }
        }
        Ok(parsed)
    }
}

fn load_config(args: &CliArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(shell) = &args.shell {
        config.shell.program = shell.clone();
    }
    config.validate().context("Invalid configuration")?;
    if config.server.transport != "stdio" {
        bail!(
            "Unsupported transport '{}': only stdio is available",
            config.server.transport
        );
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }
    let config = load_config(&args)?;

    // Initialize logging. Stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "Shellblock MCP Server v{} starting (shell: {}, max sessions: {})",
        env!("CARGO_PKG_VERSION"),
        config.shell.program,
        config.server.max_sessions
    );

    let credential = args
        .root_password
        .or_else(|| std::env::var(PASSWORD_ENV).ok())
        .filter(|password| !password.is_empty())
        .map(Credential::new);
    if credential.is_none() {
        tracing::info!("No root password configured; elevated sessions are disabled");
    }

    let registry = Arc::new(SessionRegistry::new(config, credential));
    let server = ShellblockServer::new(registry.clone());

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let service = server.serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Shellblock MCP Server running on stdio");

    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    tracing::info!("Shellblock MCP Server shutting down");
    registry.terminate_all();

    Ok(())
}
