//! Tether: scoped MCP tool sessions for blocking and async callers.
//!
//! Connects to one or more MCP tool servers (child processes over stdio, or
//! streamable HTTP endpoints), discovers their tools, and hands back
//! invocations bound to the owning session. Everything is torn down when the
//! scope exits, including any spawned child processes.
//!
//! # Quick Start
//!
//! ```no_run
//! use tether::prelude::*;
//!
//! # async fn example() -> tether::error::Result<()> {
//! let servers = vec![ServerConfig::http("http://127.0.0.1:8000/mcp")];
//! let mut bridge = ToolBridge::new(servers, BridgeOptions::from_env());
//!
//! let tools = bridge.enter().await?;
//! for tool in &tools {
//!     println!("{} ({})", tool.descriptor.exposed_name, tool.descriptor.server);
//! }
//! let report = bridge.exit().await?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod session;
pub mod tools;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;
