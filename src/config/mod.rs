//! Configuration (layered: code > env > config file).

pub mod server;

pub use server::{HttpConfig, ProcessConfig, ServerConfig};

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::BridgeError;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const STARTUP_TIMEOUT_ENV: &str = "TETHER_STARTUP_TIMEOUT_MS";
const SHUTDOWN_TIMEOUT_ENV: &str = "TETHER_SHUTDOWN_TIMEOUT_MS";

/// How tools with the same name on different servers are exposed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep every tool under its upstream name, duplicates included.
    #[default]
    Flat,
    /// Expose each tool as `<server>__<tool>`.
    Namespace,
    /// Fail startup when two servers expose the same tool name.
    Reject,
}

impl CollisionPolicy {
    pub fn exposed_name(self, server: &str, tool: &str) -> String {
        match self {
            Self::Namespace => format!("{server}__{tool}"),
            Self::Flat | Self::Reject => tool.to_owned(),
        }
    }
}

/// Bridge-level behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Upper bound for handshaking and listing tools on every server.
    #[builder(default = DEFAULT_STARTUP_TIMEOUT)]
    #[serde(rename = "startup_timeout_ms", with = "duration_ms")]
    pub startup_timeout: Duration,
    /// Upper bound for tearing every session down on exit.
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT)]
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    #[builder(default)]
    pub collision_policy: CollisionPolicy,
    /// Retry the handshake once with the 2024-11-05 protocol when the server
    /// rejects the latest protocol version.
    #[builder(default = true)]
    pub protocol_fallback: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BridgeOptions {
    /// Defaults overridden by `TETHER_*` environment variables (`.env` honoured).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut options = Self::default();
        if let Some(timeout) = env_duration_ms(STARTUP_TIMEOUT_ENV) {
            options.startup_timeout = timeout;
        }
        if let Some(timeout) = env_duration_ms(SHUTDOWN_TIMEOUT_ENV) {
            options.shutdown_timeout = timeout;
        }
        options
    }
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric timeout override");
            None
        }
    }
}

/// Server list plus bridge options, as loaded from a TOML file.
///
/// ```toml
/// [options]
/// startup_timeout_ms = 20000
/// collision_policy = "namespace"
///
/// [[servers]]
/// transport = "process"
/// name = "echo"
/// command = "uv"
/// args = ["run", "echo.py"]
/// env = { API_TOKEN = "${ECHO_TOKEN}" }
///
/// [[servers]]
/// transport = "http"
/// url = "http://127.0.0.1:8000/mcp"
/// headers = { Authorization = "Bearer ${DOCS_TOKEN}" }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub options: BridgeOptions,
}

impl BridgeConfig {
    /// Parse a TOML document and expand `${VAR}` references from the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, BridgeError> {
        let mut config: Self = toml::from_str(raw)
            .map_err(|e| BridgeError::Configuration(format!("invalid config: {e}")))?;
        config.expand_env()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    fn expand_env(&mut self) -> Result<(), BridgeError> {
        for server in &mut self.servers {
            match server {
                ServerConfig::Process(config) => {
                    for value in config.env.values_mut() {
                        *value = expand_env_vars(value)?;
                    }
                }
                ServerConfig::Http(config) => {
                    config.url = expand_env_vars(&config.url)?;
                    for value in config.headers.values_mut() {
                        *value = expand_env_vars(value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Replace every `${NAME}` with the value of environment variable `NAME`.
pub fn expand_env_vars(template: &str) -> Result<String, BridgeError> {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            BridgeError::Configuration(format!("unterminated `${{` in `{template}`"))
        })?;
        let name = &after[..end];
        if name.is_empty() {
            return Err(BridgeError::Configuration(format!(
                "empty variable reference in `{template}`"
            )));
        }
        let value = std::env::var(name).map_err(|_| {
            BridgeError::Configuration(format!("environment variable `{name}` is not set"))
        })?;
        expanded.push_str(&value);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
