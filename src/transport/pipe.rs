use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::ServiceExt;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{ClientSession, OpenError, ToolTransport};
use crate::error::TransportError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport over an already-connected byte stream pair.
///
/// Useful for in-process servers and for driving sessions in tests with a
/// [`tokio::io::duplex`] peer. The streams can be opened only once.
pub struct PipeTransport {
    label: String,
    streams: Option<(BoxedReader, BoxedWriter)>,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl PipeTransport {
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            streams: Some((Box::new(reader), Box::new(writer))),
            read_timeout: None,
            closed: false,
        }
    }

    /// Split a bidirectional stream into a pipe transport.
    pub fn from_stream<S>(label: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(label, reader, writer)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ToolTransport for PipeTransport {
    fn label(&self) -> &str {
        &self.label
    }

    async fn open(&mut self, client_info: ClientInfo) -> Result<ClientSession, OpenError> {
        let streams = match self.streams.take() {
            Some(streams) if !self.closed => streams,
            _ => {
                return Err(OpenError::Transport(TransportError::Closed {
                    server: self.label.clone(),
                }))
            }
        };
        client_info
            .into_dyn()
            .serve(streams)
            .await
            .map_err(OpenError::Initialize)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.streams = None;
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}
