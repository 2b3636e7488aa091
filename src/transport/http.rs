use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::ClientInfo;
use rmcp::service::ServiceExt;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use tracing::{debug, info};

use super::{ClientSession, OpenError, ToolTransport};
use crate::config::HttpConfig;
use crate::error::TransportError;

/// Streamable HTTP transport.
pub struct HttpTransport {
    config: HttpConfig,
    label: String,
    closed: bool,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let label = config.label();
        Self {
            config,
            label,
            closed: false,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn header_map(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::with_capacity(self.config.headers.len());
        for (key, value) in &self.config.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                TransportError::Configuration {
                    server: self.label.clone(),
                    message: format!("invalid header name `{key}`: {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| TransportError::Configuration {
                server: self.label.clone(),
                message: format!("invalid value for header `{key}`: {e}"),
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn build_http_client(&self) -> Result<reqwest::Client, TransportError> {
        reqwest::Client::builder()
            .default_headers(self.header_map()?)
            .connect_timeout(self.config.connect_timeout_duration())
            .build()
            .map_err(|e| TransportError::Connect {
                server: self.label.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    fn label(&self) -> &str {
        &self.label
    }

    async fn open(&mut self, client_info: ClientInfo) -> Result<ClientSession, OpenError> {
        if self.closed {
            return Err(TransportError::Closed {
                server: self.label.clone(),
            }
            .into());
        }

        let client = self.build_http_client()?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(self.config.url.as_str()),
        );

        let connect_timeout = self.config.connect_timeout_duration();
        debug!(server = %self.label, url = %self.config.url, "connecting to tool server");
        match tokio::time::timeout(connect_timeout, client_info.into_dyn().serve(transport)).await {
            Ok(Ok(session)) => {
                info!(server = %self.label, url = %self.config.url, "tool server connected");
                Ok(session)
            }
            Ok(Err(error)) => Err(OpenError::Initialize(error)),
            Err(_) => Err(OpenError::Transport(TransportError::Timeout {
                server: self.label.clone(),
                operation: "connect",
                after: connect_timeout,
            })),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.config.read_timeout_duration()
    }
}
