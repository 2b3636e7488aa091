//! Per-server connection descriptors.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{HttpTransport, ProcessTransport, ToolTransport};

const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Launch descriptor for a server spoken to over a child process' stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Overlay merged on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// How long a child gets to exit after its stdin closes before it is killed.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default)]
    pub inherit_stderr: bool,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: None,
            command: command.into(),
            args,
            cwd: None,
            env: BTreeMap::new(),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            inherit_stderr: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_ms = grace_period.as_millis() as u64;
        self
    }

    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    pub fn grace_period_duration(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Server label: explicit name, else the executable's file stem.
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        let executable = self
            .command
            .split_whitespace()
            .next()
            .unwrap_or(self.command.as_str());
        std::path::Path::new(executable)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("process")
            .to_owned()
    }

    /// Split the command into executable and arguments.
    ///
    /// Configs copied from other MCP clients often embed arguments in the
    /// command string (`"npx -y @scope/server"`). Those are split shell-style,
    /// but only when no separate `args` were given.
    pub fn resolved_command(&self) -> Result<(String, Vec<String>), String> {
        let command = self.command.trim();
        if command.is_empty() {
            return Err("command must not be empty".into());
        }
        if !self.args.is_empty() || !command.contains(char::is_whitespace) {
            return Ok((command.to_owned(), self.args.clone()));
        }

        let mut parts = shell_words::split(command)
            .map_err(|e| format!("failed to parse command `{command}`: {e}"))?
            .into_iter();
        let executable = parts
            .next()
            .ok_or_else(|| "command is empty after parsing".to_string())?;
        Ok((executable, parts.collect()))
    }
}

/// Descriptor for a server reachable over streamable HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for a single request/response round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            headers: BTreeMap::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout_duration(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Server label: explicit name, else the URL host.
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| self.url.clone())
    }
}

/// One configured tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    #[serde(alias = "stdio")]
    Process(ProcessConfig),
    #[serde(alias = "streamable_http")]
    Http(HttpConfig),
}

impl ServerConfig {
    /// Shorthand for a process server with no overrides.
    pub fn process(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Process(ProcessConfig::new(command, args))
    }

    /// Shorthand for a streamable HTTP server with default timeouts.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http(HttpConfig::new(url))
    }

    pub fn label(&self) -> String {
        match self {
            Self::Process(config) => config.label(),
            Self::Http(config) => config.label(),
        }
    }

    /// Build the transport handle for this server. Nothing is opened yet.
    pub fn into_transport(self) -> Box<dyn ToolTransport> {
        match self {
            Self::Process(config) => Box::new(ProcessTransport::new(config)),
            Self::Http(config) => Box::new(HttpTransport::new(config)),
        }
    }
}

impl From<ProcessConfig> for ServerConfig {
    fn from(config: ProcessConfig) -> Self {
        Self::Process(config)
    }
}

impl From<HttpConfig> for ServerConfig {
    fn from(config: HttpConfig) -> Self {
        Self::Http(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_label_prefers_name_then_file_stem() {
        let config = ProcessConfig::new("/usr/local/bin/echo-server.py", Vec::new());
        assert_eq!(config.label(), "echo-server");

        let named = config.name("echo");
        assert_eq!(named.label(), "echo");
    }

    #[test]
    fn http_label_falls_back_to_host() {
        let config = HttpConfig::new("http://127.0.0.1:8000/mcp");
        assert_eq!(config.label(), "127.0.0.1");
        assert_eq!(config.clone().name("docs").label(), "docs");
    }

    #[test]
    fn resolved_command_splits_embedded_arguments() {
        let config = ProcessConfig::new("npx -y \"@scope/server name\"", Vec::new());
        let (executable, args) = config.resolved_command().expect("command should split");
        assert_eq!(executable, "npx");
        assert_eq!(args, vec!["-y".to_string(), "@scope/server name".to_string()]);
    }

    #[test]
    fn resolved_command_keeps_explicit_args_untouched() {
        let config = ProcessConfig::new("uv", vec!["run".into(), "server.py".into()]);
        let (executable, args) = config.resolved_command().expect("command should resolve");
        assert_eq!(executable, "uv");
        assert_eq!(args, vec!["run".to_string(), "server.py".to_string()]);
    }

    #[test]
    fn resolved_command_rejects_unbalanced_quotes_and_empty_commands() {
        let unbalanced = ProcessConfig::new("node 'server.js", Vec::new());
        assert!(unbalanced.resolved_command().is_err());

        let empty = ProcessConfig::new("   ", Vec::new());
        assert!(empty.resolved_command().is_err());
    }

    #[test]
    fn server_config_deserializes_transport_aliases() {
        let stdio: ServerConfig = serde_json::from_value(serde_json::json!({
            "transport": "stdio",
            "command": "uv",
            "args": ["run", "echo.py"]
        }))
        .expect("stdio alias should deserialize");
        assert!(matches!(stdio, ServerConfig::Process(ref p) if p.grace_period_ms == 2_000));

        let http: ServerConfig = serde_json::from_value(serde_json::json!({
            "transport": "streamable_http",
            "url": "http://localhost:9000/mcp",
            "read_timeout_ms": 500
        }))
        .expect("http alias should deserialize");
        match http {
            ServerConfig::Http(config) => {
                assert_eq!(config.connect_timeout_ms, 10_000);
                assert_eq!(config.read_timeout_duration(), Some(Duration::from_millis(500)));
            }
            other => panic!("expected http config, got {other:?}"),
        }
    }
}
