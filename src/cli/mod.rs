//! CLI entry point for tether.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::adapter::DynamicToolAdapter;
use crate::bridge::ToolBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, SessionError};

/// Tether CLI
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Tether: inspect and call MCP tool servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tools every configured server exposes
    Tools(ToolsArgs),
    /// Call one tool and print its result
    Call(CallArgs),
}

/// Arguments for the `tools` subcommand.
#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Path to the TOML server configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Print full descriptors (including schemas) as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Path to the TOML server configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Exposed tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,

    /// Only match the tool on this server
    #[arg(short, long)]
    pub server: Option<String>,
}

/// `tether tools`: enter in blocking mode, print the tool list, exit.
pub fn handle_tools(args: &ToolsArgs) -> Result<(), BridgeError> {
    let config = BridgeConfig::from_file(&args.config)?;
    let bridge = ToolBridge::from_config(config);

    let (listing, report) = bridge.scoped_blocking(|tools| {
        if args.json {
            let descriptors: Vec<_> = tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "name": tool.descriptor.exposed_name,
                        "server": tool.descriptor.server,
                        "description": tool.descriptor.description,
                        "input_schema": tool.descriptor.input_schema,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&descriptors).unwrap_or_default()
        } else {
            tools
                .iter()
                .map(|tool| {
                    format!(
                        "{:<32} {:<16} {}",
                        tool.descriptor.exposed_name, tool.descriptor.server, tool.descriptor.description
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    })?;

    println!("{listing}");
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `tether call`: enter in async mode, call one tool, exit.
pub async fn handle_call(args: &CallArgs) -> Result<serde_json::Value, BridgeError> {
    let config = BridgeConfig::from_file(&args.config)?;
    let arguments: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| BridgeError::Configuration(format!("--args must be valid JSON: {e}")))?;

    let mut bridge = ToolBridge::from_config(config);
    let tools = bridge.enter_with(&DynamicToolAdapter).await?;

    let outcome = match tools.iter().find(|tool| {
        tool.name == args.tool
            && args
                .server
                .as_deref()
                .map_or(true, |server| tool.server == server)
    }) {
        Some(tool) => tool.execute(arguments).await,
        None => Err(BridgeError::Session(SessionError::ToolNotFound {
            server: args.server.clone().unwrap_or_else(|| "*".into()),
            tool: args.tool.clone(),
        })),
    };

    let report = bridge.exit().await?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    outcome
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
