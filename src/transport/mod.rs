//! Transport handles: the byte channel under one session.
//!
//! A transport owns whatever OS resources back the channel (a child process,
//! an HTTP client) and hands rmcp a framed stream to run the handshake over.
//! Closing a transport releases those resources; it is idempotent.

use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService};

use crate::error::TransportError;

mod http;
mod pipe;
mod process;

pub use http::HttpTransport;
pub use pipe::PipeTransport;
pub use process::ProcessTransport;

pub type DynClientService = Box<dyn DynService<RoleClient>>;
pub type ClientSession = RunningService<RoleClient, DynClientService>;

/// Why [`ToolTransport::open`] did not yield a live client session.
#[derive(Debug)]
pub enum OpenError {
    /// The channel itself could not be established.
    Transport(TransportError),
    /// The channel came up but the protocol handshake failed.
    Initialize(ClientInitializeError),
}

impl From<TransportError> for OpenError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

/// Transport trait for one tool server connection.
#[async_trait]
pub trait ToolTransport: Send {
    /// Server label used in logs and errors.
    fn label(&self) -> &str;

    /// Open the channel and run the protocol handshake over it.
    ///
    /// May be called again after a failed handshake; any resources from the
    /// earlier attempt are released first.
    async fn open(&mut self, client_info: ClientInfo) -> Result<ClientSession, OpenError>;

    /// Release the channel. Safe to call repeatedly and after a failed open.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Release the channel without any grace period.
    ///
    /// Used when a graceful close overran the bridge's shutdown timeout.
    async fn kill(&mut self) -> Result<(), TransportError> {
        self.close().await
    }

    /// Upper bound for one request/response round trip, if configured.
    fn read_timeout(&self) -> Option<Duration> {
        None
    }
}
