//! Shared test helpers: a scripted MCP server over in-memory pipes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use tether::error::TransportError;
use tether::transport::{ClientSession, OpenError, PipeTransport, ToolTransport};

/// What a scripted tool does when called.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Return `arguments.text` as text content.
    Echo,
    /// Return an error result with this text.
    Fail(String),
    /// Sleep, then echo.
    Slow(Duration),
}

#[derive(Clone, Debug)]
pub struct FakeTool {
    pub name: String,
    pub description: String,
    pub behavior: Behavior,
}

impl FakeTool {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            description: format!("{name} tool"),
            behavior,
        }
    }
}

/// A scripted server definition. Every `open` spawns a fresh instance.
#[derive(Clone, Debug, Default)]
pub struct FakeServer {
    pub name: String,
    pub tools: Vec<FakeTool>,
    /// Reject the initialize request with this JSON-RPC error.
    pub reject_initialize: Option<(i32, String)>,
    /// Reject every protocol version except 2024-11-05.
    pub legacy_protocol_only: bool,
    /// Never answer the initialize request.
    pub hang_on_initialize: bool,
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn tool(mut self, name: &str, behavior: Behavior) -> Self {
        self.tools.push(FakeTool::new(name, behavior));
        self
    }

    pub fn echo(name: &str) -> Self {
        Self::new(name).tool("echo_tool", Behavior::Echo)
    }

    pub fn reject_initialize(mut self, code: i32, message: &str) -> Self {
        self.reject_initialize = Some((code, message.into()));
        self
    }

    pub fn legacy_protocol_only(mut self) -> Self {
        self.legacy_protocol_only = true;
        self
    }

    pub fn hang_on_initialize(mut self) -> Self {
        self.hang_on_initialize = true;
        self
    }

    /// Build a transport driving this server, plus a probe to observe it.
    pub fn transport(self) -> (FakeTransport, Probe) {
        let probe = Probe::default();
        let transport = FakeTransport {
            server: self,
            probe: probe.clone(),
            read_timeout: None,
        };
        (transport, probe)
    }

    pub fn boxed(self) -> (Box<dyn ToolTransport>, Probe) {
        let (transport, probe) = self.transport();
        (Box::new(transport), probe)
    }
}

/// Observations shared between a fake server and the test.
#[derive(Clone, Default)]
pub struct Probe {
    pub events: Arc<Mutex<Vec<String>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub disconnected: Arc<AtomicBool>,
    pub protocol_versions: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn protocol_versions(&self) -> Vec<String> {
        self.protocol_versions.lock().expect("versions lock").clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Wait until the client side of the pipe has gone away.
    pub async fn wait_disconnected(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.is_disconnected() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.is_disconnected()
    }

    fn record(&self, event: String) {
        self.events.lock().expect("events lock").push(event);
    }
}

pub struct FakeTransport {
    server: FakeServer,
    probe: Probe,
    read_timeout: Option<Duration>,
}

impl FakeTransport {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ToolTransport for FakeTransport {
    fn label(&self) -> &str {
        &self.server.name
    }

    async fn open(
        &mut self,
        client_info: rmcp::model::ClientInfo,
    ) -> Result<ClientSession, OpenError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe.disconnected.store(false, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_server(self.server.clone(), self.probe.clone(), server));

        let mut pipe = PipeTransport::from_stream(self.server.name.clone(), client);
        pipe.open(client_info).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}

async fn run_server(server: FakeServer, probe: Probe, stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if write.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let id = request.get("id").cloned();
        let Some(id) = id else {
            // Notification.
            continue;
        };

        match method.as_str() {
            "initialize" => {
                let requested = request["params"]["protocolVersion"]
                    .as_str()
                    .unwrap_or_default()
                    .to_owned();
                probe
                    .protocol_versions
                    .lock()
                    .expect("versions lock")
                    .push(requested.clone());

                if server.hang_on_initialize {
                    continue;
                }
                if let Some((code, message)) = &server.reject_initialize {
                    let _ = out_tx.send(error_response(id, *code, message));
                    continue;
                }
                if server.legacy_protocol_only && requested != "2024-11-05" {
                    let _ = out_tx.send(error_response(
                        id,
                        -32602,
                        "Unsupported protocol version",
                    ));
                    continue;
                }
                let _ = out_tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": requested,
                        "capabilities": { "tools": { "listChanged": false } },
                        "serverInfo": { "name": server.name, "version": "1.0.0" },
                        "instructions": format!("{} test server", server.name)
                    }
                }));
            }
            "tools/list" => {
                let tools: Vec<_> = server
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": {
                                "type": "object",
                                "properties": { "text": { "type": "string" } },
                                "required": ["text"]
                            }
                        })
                    })
                    .collect();
                let _ = out_tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "tools": tools }
                }));
            }
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default().to_owned();
                let arguments = request["params"]["arguments"].clone();
                let tool = server.tools.iter().find(|tool| tool.name == name).cloned();
                let out_tx = out_tx.clone();
                let probe = probe.clone();
                tokio::spawn(async move {
                    probe.record(format!("start:{name}"));
                    let response = match tool.map(|tool| tool.behavior) {
                        None => error_response(id, -32602, &format!("Unknown tool: {name}")),
                        Some(Behavior::Fail(message)) => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "content": [{ "type": "text", "text": message }],
                                "isError": true
                            }
                        }),
                        Some(Behavior::Slow(delay)) => {
                            tokio::time::sleep(delay).await;
                            text_response(id, &arguments)
                        }
                        Some(Behavior::Echo) => {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            text_response(id, &arguments)
                        }
                    };
                    probe.record(format!("end:{name}"));
                    let _ = out_tx.send(response);
                });
            }
            "ping" => {
                let _ = out_tx.send(json!({ "jsonrpc": "2.0", "id": id, "result": {} }));
            }
            other => {
                let _ = out_tx.send(error_response(id, -32601, &format!("Method not found: {other}")));
            }
        }
    }

    probe.disconnected.store(true, Ordering::SeqCst);
    drop(out_tx);
    let _ = writer.await;
}

fn text_response(id: Value, arguments: &Value) -> Value {
    let text = arguments
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": text }],
            "isError": false
        }
    })
}

fn error_response(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
