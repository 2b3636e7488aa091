//! Discovered tool descriptors and call results.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::session::Session;

/// A tool discovered on one server during pool startup.
///
/// Holds a non-owning link back to the session that exposes it; the link is
/// only used for dispatch and goes dead once the bridge scope closes.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Upstream tool name, as the server knows it.
    pub name: String,
    /// Name the tool is exposed under after collision handling.
    pub exposed_name: String,
    pub description: String,
    /// JSON Schema for the accepted arguments.
    pub input_schema: serde_json::Value,
    /// Label of the owning server.
    pub server: String,
    session: Weak<Session>,
}

impl ToolDescriptor {
    pub(crate) fn new(
        session: &Arc<Session>,
        name: String,
        description: String,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            exposed_name: name.clone(),
            name,
            description,
            input_schema,
            server: session.label().to_owned(),
            session: Arc::downgrade(session),
        }
    }

    pub(crate) fn session(&self) -> Weak<Session> {
        self.session.clone()
    }

    /// Whether the owning session is still held by a live pool.
    pub fn is_attached(&self) -> bool {
        self.session.strong_count() > 0
    }
}

impl PartialEq for ToolDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.exposed_name == other.exposed_name
            && self.description == other.description
            && self.input_schema == other.input_schema
            && self.server == other.server
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("exposed_name", &self.exposed_name)
            .field("server", &self.server)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Successful result of one remote tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub structured_content: Option<serde_json::Value>,
    /// Text blocks (and embedded text resources) joined by newlines.
    pub text_content: Option<String>,
    /// Raw content blocks as returned by the server.
    pub content: Vec<serde_json::Value>,
}

impl ToolCallResult {
    /// Structured content if present, else the text, else the raw blocks.
    pub fn into_value_or_text(self) -> serde_json::Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return serde_json::Value::String(text);
        }
        serde_json::Value::Array(self.content)
    }
}
