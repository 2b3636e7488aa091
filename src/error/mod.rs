//! Error types for tether.
//!
//! Errors are layered the same way the components are: a [`TransportError`]
//! is wrapped by a [`SessionError`], a failing session during startup is
//! wrapped by a [`PoolError`], and the bridge reports everything through
//! [`BridgeError`]. Every variant carries the server label so a caller can
//! tell which configured server misbehaved.

use std::time::Duration;

use thiserror::Error;

/// Failure of the byte-level channel underneath a session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("[{server}] failed to spawn `{command}`: {source}")]
    Spawn {
        server: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{server}] connect failed: {message}")]
    Connect { server: String, message: String },

    #[error("[{server}] {operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        server: String,
        operation: &'static str,
        after: Duration,
    },

    #[error("[{server}] connection closed by peer")]
    Closed { server: String },

    #[error("[{server}] transport I/O failed: {message}")]
    Io { server: String, message: String },

    #[error("[{server}] invalid transport configuration: {message}")]
    Configuration { server: String, message: String },
}

impl TransportError {
    /// Label of the server whose transport failed.
    pub fn server(&self) -> &str {
        match self {
            Self::Spawn { server, .. }
            | Self::Connect { server, .. }
            | Self::Timeout { server, .. }
            | Self::Closed { server }
            | Self::Io { server, .. }
            | Self::Configuration { server, .. } => server,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of a single server session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("[{server}] handshake rejected (code {code}): {message}")]
    HandshakeRejected {
        server: String,
        code: i32,
        message: String,
    },

    #[error("[{server}] tool not found: {tool}")]
    ToolNotFound { server: String, tool: String },

    #[error("[{server}] tool `{tool}` failed: {message}")]
    ToolExecution {
        server: String,
        tool: String,
        message: String,
    },

    #[error("[{server}] {operation}: MCP error {code}: {message}")]
    Rpc {
        server: String,
        operation: &'static str,
        code: i32,
        message: String,
    },

    #[error("[{server}] unexpected MCP response: {message}")]
    Protocol { server: String, message: String },

    #[error("[{server}] invalid arguments for `{tool}`: {message}")]
    InvalidArguments {
        server: String,
        tool: String,
        message: String,
    },

    #[error("[{server}] {operation} cancelled")]
    Cancelled {
        server: String,
        operation: &'static str,
    },

    #[error("[{server}] cannot {operation} while session is {state}")]
    InvalidState {
        server: String,
        operation: &'static str,
        state: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Label of the server this error belongs to.
    pub fn server(&self) -> &str {
        match self {
            Self::HandshakeRejected { server, .. }
            | Self::ToolNotFound { server, .. }
            | Self::ToolExecution { server, .. }
            | Self::Rpc { server, .. }
            | Self::Protocol { server, .. }
            | Self::InvalidArguments { server, .. }
            | Self::Cancelled { server, .. }
            | Self::InvalidState { server, .. } => server,
            Self::Transport(error) => error.server(),
        }
    }

    /// Tool name involved in the failure, when there is one.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::ToolNotFound { tool, .. }
            | Self::ToolExecution { tool, .. }
            | Self::InvalidArguments { tool, .. } => Some(tool),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Startup failure of a session pool. No tools are exposed when this occurs.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("server #{index} ({server}) failed to start: {source}")]
    Session {
        index: usize,
        server: String,
        #[source]
        source: SessionError,
    },

    #[error(
        "pool startup timed out after {}ms; still connecting: {}",
        .after.as_millis(),
        describe_pending(.pending)
    )]
    StartupTimeout {
        after: Duration,
        /// `(index, label)` of each server whose startup had not finished.
        pending: Vec<(usize, String)>,
    },

    #[error("duplicate tool `{tool}` exposed by {first} and {second}")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    #[error("pool already started")]
    AlreadyStarted,
}

impl PoolError {
    /// The session error that aborted startup, if a session failed.
    pub fn session_error(&self) -> Option<&SessionError> {
        match self {
            Self::Session { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn describe_pending(pending: &[(usize, String)]) -> String {
    if pending.is_empty() {
        return "none".into();
    }
    pending
        .iter()
        .map(|(index, server)| format!("#{index} ({server})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the lifecycle bridge and by bound invocations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge scope already entered")]
    AlreadyEntered,

    #[error("bridge scope was never entered")]
    NotEntered,

    #[error("bridge scope already exited")]
    AlreadyExited,

    #[error("bridge was entered in {entered} mode; exit it the same way")]
    ModeMismatch { entered: &'static str },

    #[error("bridge scope is closed; `{tool}` can no longer be invoked")]
    ScopeClosed { tool: String },

    #[error("bridge shutdown did not finish within {}ms", .after.as_millis())]
    ShutdownTimeout { after: Duration },

    #[error("bridge background worker stopped unexpectedly")]
    WorkerLost,

    #[error("failed to start bridge runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl BridgeError {
    /// Whether an invocation was cut short by scope teardown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Session(error) if error.is_cancelled())
    }

    /// Whether this is caller misuse of the scope contract.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::AlreadyEntered
                | Self::NotEntered
                | Self::AlreadyExited
                | Self::ModeMismatch { .. }
                | Self::ScopeClosed { .. }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
