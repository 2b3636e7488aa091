use std::sync::{mpsc, Arc, Weak};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, SessionError};
use crate::session::Session;
use crate::tools::{ToolCallResult, ToolDescriptor};

/// Routing data shared by both invocation flavours.
#[derive(Debug, Clone)]
struct Binding {
    tool: String,
    exposed_name: String,
    server: String,
    session: Weak<Session>,
    scope: CancellationToken,
}

impl Binding {
    fn new(descriptor: &ToolDescriptor, scope: CancellationToken) -> Self {
        Self {
            tool: descriptor.name.clone(),
            exposed_name: descriptor.exposed_name.clone(),
            server: descriptor.server.clone(),
            session: descriptor.session(),
            scope,
        }
    }

    fn live_session(&self) -> Result<Arc<Session>, BridgeError> {
        if self.scope.is_cancelled() {
            return Err(self.scope_closed());
        }
        self.session.upgrade().ok_or_else(|| self.scope_closed())
    }

    fn scope_closed(&self) -> BridgeError {
        BridgeError::ScopeClosed {
            tool: self.exposed_name.clone(),
        }
    }
}

/// Suspending invocation for a tool discovered by an async-mode bridge.
#[derive(Debug, Clone)]
pub struct AsyncInvocation {
    binding: Binding,
}

impl AsyncInvocation {
    pub(crate) fn new(descriptor: &ToolDescriptor, scope: CancellationToken) -> Self {
        Self {
            binding: Binding::new(descriptor, scope),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.binding.exposed_name
    }

    pub fn server(&self) -> &str {
        &self.binding.server
    }

    /// Call the tool on its owning session.
    ///
    /// Fails with [`BridgeError::ScopeClosed`] once the bridge has exited.
    pub async fn call(&self, arguments: serde_json::Value) -> Result<ToolCallResult, BridgeError> {
        let session = self.binding.live_session()?;
        Ok(session.call_tool(&self.binding.tool, arguments).await?)
    }
}

/// Blocking invocation for a tool discovered by a sync-mode bridge.
///
/// Each call is scheduled onto the bridge's background runtime and the calling
/// thread waits for the reply.
#[derive(Debug, Clone)]
pub struct BlockingInvocation {
    binding: Binding,
    runtime: Handle,
}

impl BlockingInvocation {
    pub(crate) fn new(descriptor: &ToolDescriptor, scope: CancellationToken, runtime: Handle) -> Self {
        Self {
            binding: Binding::new(descriptor, scope),
            runtime,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.binding.exposed_name
    }

    pub fn server(&self) -> &str {
        &self.binding.server
    }

    /// Call the tool and block until the result arrives.
    pub fn call(&self, arguments: serde_json::Value) -> Result<ToolCallResult, BridgeError> {
        let session = self.binding.live_session()?;
        let tool = self.binding.tool.clone();
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        self.runtime.spawn(async move {
            let result = session.call_tool(&tool, arguments).await;
            let _ = reply_tx.send(result);
        });

        match reply_rx.recv() {
            Ok(result) => Ok(result?),
            // The runtime dropped the task before it replied.
            Err(_) => Err(BridgeError::Session(SessionError::Cancelled {
                server: self.binding.server.clone(),
                operation: "call_tool",
            })),
        }
    }
}
