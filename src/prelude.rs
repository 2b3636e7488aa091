//! Convenience re-exports for common use.

pub use crate::adapter::{AsyncAdapter, BlockingAdapter, DynamicTool, DynamicToolAdapter};
pub use crate::bridge::{AsyncInvocation, AsyncTool, BlockingInvocation, BlockingTool, BoundTool, ToolBridge};
pub use crate::config::{
    BridgeConfig, BridgeOptions, CollisionPolicy, HttpConfig, ProcessConfig, ServerConfig,
};
pub use crate::error::{BridgeError, PoolError, Result, SessionError, TransportError};
pub use crate::pool::{SessionPool, TeardownReport};
pub use crate::session::{Session, SessionState};
pub use crate::tools::{ToolCallResult, ToolDescriptor};
pub use crate::transport::{HttpTransport, PipeTransport, ProcessTransport, ToolTransport};
