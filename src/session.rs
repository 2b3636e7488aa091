//! One live, handshaked connection to a tool server.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, OnceLock};
use std::time::Instant;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
    ResourceContents,
};
use rmcp::service::{ClientInitializeError, ServiceError};
use strum::Display;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, TransportError};
use crate::tools::{ToolCallResult, ToolDescriptor};
use crate::transport::{ClientSession, OpenError, ToolTransport};

/// Lifecycle of a [`Session`].
///
/// `Connecting -> Ready -> Closed`, or `Connecting -> Failed`. There is no way
/// back to `Connecting`; a session is used for one bridge scope only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Failed,
    Closed,
}

/// What the server reported about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: Option<String>,
    pub instructions: Option<String>,
}

struct SessionInner {
    transport: Box<dyn ToolTransport>,
    service: Option<ClientSession>,
}

/// A session owns its transport and serializes every round trip on it.
pub struct Session {
    label: String,
    protocol_fallback: bool,
    read_timeout: Option<std::time::Duration>,
    inner: Mutex<SessionInner>,
    state: StdMutex<SessionState>,
    tool_names: OnceLock<HashSet<String>>,
    server_info: OnceLock<ServerInfo>,
    shutdown: CancellationToken,
    released: AtomicBool,
}

impl Session {
    pub fn new(transport: Box<dyn ToolTransport>) -> Self {
        Self {
            label: transport.label().to_owned(),
            protocol_fallback: true,
            read_timeout: transport.read_timeout(),
            inner: Mutex::new(SessionInner {
                transport,
                service: None,
            }),
            state: StdMutex::new(SessionState::Connecting),
            tool_names: OnceLock::new(),
            server_info: OnceLock::new(),
            shutdown: CancellationToken::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Retry the handshake with the 2024-11-05 protocol when the server
    /// rejects the latest version. On by default.
    pub fn with_protocol_fallback(mut self, enabled: bool) -> Self {
        self.protocol_fallback = enabled;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        *self.state_guard()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.get()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tool_names
            .get()
            .is_some_and(|names| names.contains(name))
    }

    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state_guard() = state;
    }

    /// Open the transport, handshake, and list the server's tools.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<ToolDescriptor>, SessionError> {
        let state = self.state();
        if state != SessionState::Connecting || self.tool_names.get().is_some() {
            return Err(SessionError::InvalidState {
                server: self.label.clone(),
                operation: "start",
                state: state.to_string(),
            });
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SessionError::Cancelled {
                server: self.label.clone(),
                operation: "start",
            }),
            outcome = self.handshake_and_discover() => outcome,
        };

        match outcome {
            Ok(tools) => {
                let names = tools.iter().map(|tool| tool.name.clone()).collect();
                let _ = self.tool_names.set(names);
                self.set_state(SessionState::Ready);
                info!(
                    server = %self.label,
                    tools = tools.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "session ready"
                );
                Ok(tools)
            }
            Err(error) => {
                self.set_state(SessionState::Failed);
                error!(server = %self.label, %error, "session failed to start");
                Err(error)
            }
        }
    }

    async fn handshake_and_discover(self: &Arc<Self>) -> Result<Vec<ToolDescriptor>, SessionError> {
        let mut inner = self.inner.lock().await;
        let service = self.connect_with_protocol_fallback(&mut inner).await?;

        if let Some(peer) = service.peer_info() {
            let info = ServerInfo {
                name: peer.server_info.name.clone(),
                version: peer.server_info.version.clone(),
                protocol_version: serde_json::to_value(&peer.protocol_version)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_owned)),
                instructions: peer.instructions.clone(),
            };
            debug!(
                server = %self.label,
                remote = %info.name,
                version = %info.version,
                protocol = ?info.protocol_version,
                "handshake complete"
            );
            let _ = self.server_info.set(info);
        }

        let listed = self
            .bounded("list_tools", async {
                match service.list_all_tools().await {
                    Err(ServiceError::UnexpectedResponse) => {
                        service.list_tools(None).await.map(|page| page.tools)
                    }
                    other => other,
                }
            })
            .await;
        inner.service = Some(service);
        let listed = listed?;

        Ok(listed
            .into_iter()
            .map(|tool| {
                ToolDescriptor::new(
                    self,
                    tool.name.to_string(),
                    tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    serde_json::Value::Object((*tool.input_schema).clone()),
                )
            })
            .collect())
    }

    async fn connect_with_protocol_fallback(
        &self,
        inner: &mut SessionInner,
    ) -> Result<ClientSession, SessionError> {
        let latest = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };

        match inner.transport.open(latest).await {
            Ok(service) => return Ok(service),
            Err(OpenError::Initialize(error))
                if self.protocol_fallback && should_retry_protocol_fallback(&error) =>
            {
                warn!(server = %self.label, %error, "server rejected protocol version; retrying with 2024-11-05");
            }
            Err(error) => return Err(map_open_error(&self.label, error)),
        }

        let fallback = ClientInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            ..Default::default()
        };
        inner
            .transport
            .open(fallback)
            .await
            .map_err(|error| map_open_error(&self.label, error))
    }

    /// Call `name` with `arguments` and wait for the result.
    ///
    /// Calls on one session are serialized: a second caller waits until the
    /// first round trip has completed.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, SessionError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(SessionError::InvalidState {
                server: self.label.clone(),
                operation: "call_tool",
                state: state.to_string(),
            });
        }
        if !self.has_tool(name) {
            return Err(SessionError::ToolNotFound {
                server: self.label.clone(),
                tool: name.to_owned(),
            });
        }
        let arguments = coerce_tool_arguments(&self.label, name, arguments)?;

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SessionError::Cancelled {
                server: self.label.clone(),
                operation: "call_tool",
            }),
            result = self.round_trip(name, arguments) => result,
        };
        debug!(
            server = %self.label,
            tool = name,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );

        map_call_result(&self.label, name, result?)
    }

    async fn round_trip(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, SessionError> {
        let inner = self.inner.lock().await;
        let service = inner.service.as_ref().ok_or_else(|| TransportError::Closed {
            server: self.label.clone(),
        })?;

        let request = service.call_tool(CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments,
            task: None,
        });
        self.bounded("call_tool", request).await
    }

    /// Await one round trip under the transport's read timeout, if any.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, SessionError> {
        let response = match self.read_timeout {
            Some(after) => tokio::time::timeout(after, request).await.map_err(|_| {
                TransportError::Timeout {
                    server: self.label.clone(),
                    operation,
                    after,
                }
            })?,
            None => request.await,
        };
        response.map_err(|error| map_service_error(&self.label, operation, error))
    }

    /// Tear the session down. Idempotent, and safe after a failed start.
    ///
    /// Outstanding calls are cancelled rather than awaited.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.shutdown.cancel();
        let mut inner = self.inner.lock().await;
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.state();

        let service_result = match inner.service.take() {
            Some(service) => service.cancel().await.map(|reason| {
                debug!(server = %self.label, ?reason, "service loop stopped");
            }),
            None => Ok(()),
        };
        let transport_result = inner.transport.close().await;

        if state != SessionState::Failed {
            self.set_state(SessionState::Closed);
        }
        info!(server = %self.label, previous = %state, "session stopped");

        service_result.map_err(|error| {
            SessionError::Transport(TransportError::Io {
                server: self.label.clone(),
                message: format!("service task failed: {error}"),
            })
        })?;
        transport_result.map_err(SessionError::from)
    }

    /// Force-release the transport, skipping any grace period.
    ///
    /// Runs after a [`stop`](Self::stop) that was abandoned part way, and is
    /// harmless after one that completed.
    pub async fn abort(&self) -> Result<(), SessionError> {
        self.shutdown.cancel();
        let mut inner = self.inner.lock().await;
        self.released.store(true, Ordering::SeqCst);

        // Dropping the running service cancels its loop and closes the pipes.
        drop(inner.service.take());
        let result = inner.transport.kill().await;

        if self.state() != SessionState::Failed {
            self.set_state(SessionState::Closed);
        }
        warn!(server = %self.label, "session force-released");
        result.map_err(SessionError::from)
    }
}

fn should_retry_protocol_fallback(error: &ClientInitializeError) -> bool {
    match error {
        ClientInitializeError::JsonRpcError(error) => {
            let message = error.message.to_ascii_lowercase();
            message.contains("protocol") && message.contains("version")
        }
        _ => false,
    }
}

fn map_open_error(server: &str, error: OpenError) -> SessionError {
    let error = match error {
        OpenError::Transport(error) => return SessionError::Transport(error),
        OpenError::Initialize(error) => error,
    };
    match error {
        ClientInitializeError::JsonRpcError(error) => SessionError::HandshakeRejected {
            server: server.to_owned(),
            code: error.code.0,
            message: error.message.to_string(),
        },
        ClientInitializeError::ConnectionClosed(context) => {
            SessionError::Transport(TransportError::Connect {
                server: server.to_owned(),
                message: format!("connection closed during handshake: {context}"),
            })
        }
        ClientInitializeError::TransportError { error, context } => {
            SessionError::Transport(TransportError::Io {
                server: server.to_owned(),
                message: format!("handshake transport error ({context}): {error}"),
            })
        }
        ClientInitializeError::Cancelled => SessionError::Cancelled {
            server: server.to_owned(),
            operation: "initialize",
        },
        other => SessionError::Protocol {
            server: server.to_owned(),
            message: format!("initialize failed: {other}"),
        },
    }
}

fn map_service_error(server: &str, operation: &'static str, error: ServiceError) -> SessionError {
    let server = server.to_owned();
    match error {
        ServiceError::McpError(error) => SessionError::Rpc {
            server,
            operation,
            code: error.code.0,
            message: error.message.to_string(),
        },
        ServiceError::TransportSend(error) => SessionError::Transport(TransportError::Io {
            server,
            message: format!("{operation}: send failed: {error}"),
        }),
        ServiceError::TransportClosed => SessionError::Transport(TransportError::Closed { server }),
        ServiceError::UnexpectedResponse => SessionError::Protocol {
            server,
            message: format!("unexpected response to {operation}"),
        },
        ServiceError::Cancelled { .. } => SessionError::Cancelled { server, operation },
        ServiceError::Timeout { timeout } => SessionError::Transport(TransportError::Timeout {
            server,
            operation,
            after: timeout,
        }),
        other => SessionError::Protocol {
            server,
            message: format!("{operation}: {other}"),
        },
    }
}

/// Accepts an object, `null`, or a JSON string holding either.
fn coerce_tool_arguments(
    server: &str,
    tool: &str,
    value: serde_json::Value,
) -> Result<Option<JsonObject>, SessionError> {
    let invalid = |message: String| SessionError::InvalidArguments {
        server: server.to_owned(),
        tool: tool.to_owned(),
        message,
    };
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed)
                .map_err(|e| invalid(format!("arguments must be valid JSON: {e}")))?;
            if parsed.is_string() {
                return Err(invalid("arguments must be a JSON object".into()));
            }
            coerce_tool_arguments(server, tool, parsed)
        }
        other => Err(invalid(format!("arguments must be a JSON object; got {other}"))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn map_call_result(
    server: &str,
    tool: &str,
    result: CallToolResult,
) -> Result<ToolCallResult, SessionError> {
    let text_content = extract_text_content(&result.content);

    if result.is_error.unwrap_or(false) {
        let message = text_content
            .clone()
            .or_else(|| result.structured_content.as_ref().map(|v| v.to_string()))
            .unwrap_or_else(|| "tool returned an error result".into());
        return Err(SessionError::ToolExecution {
            server: server.to_owned(),
            tool: tool.to_owned(),
            message,
        });
    }

    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect();
    Ok(ToolCallResult {
        structured_content: result.structured_content,
        text_content,
        content,
    })
}
