//! Conversion of discovered tools into caller-side tool objects.
//!
//! A framework integration implements [`BlockingAdapter`], [`AsyncAdapter`],
//! or both. The bridge calls the adapter once per tool, only after every
//! server has started.

use crate::bridge::{AsyncInvocation, BlockingInvocation};
use crate::error::BridgeError;
use crate::tools::ToolDescriptor;

/// Converts a tool for callers that block.
pub trait BlockingAdapter {
    type Tool;

    fn adapt(&self, descriptor: &ToolDescriptor, invocation: BlockingInvocation) -> Self::Tool;
}

/// Converts a tool for callers running on an async runtime.
pub trait AsyncAdapter {
    type Tool;

    fn adapt_async(&self, descriptor: &ToolDescriptor, invocation: AsyncInvocation)
        -> Self::Tool;
}

/// Generic runtime-discovered tool: name, description, JSON Schema and a
/// bound invocation returning plain JSON.
#[derive(Clone)]
pub struct DynamicTool<I> {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Label of the server that owns the tool.
    pub server: String,
    invocation: I,
}

impl<I> DynamicTool<I> {
    fn new(descriptor: &ToolDescriptor, invocation: I) -> Self {
        Self {
            name: descriptor.exposed_name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.input_schema.clone(),
            server: descriptor.server.clone(),
            invocation,
        }
    }
}

impl DynamicTool<BlockingInvocation> {
    pub fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
        Ok(self.invocation.call(args)?.into_value_or_text())
    }
}

impl DynamicTool<AsyncInvocation> {
    pub async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
        Ok(self.invocation.call(args).await?.into_value_or_text())
    }
}

/// Adapter producing [`DynamicTool`]s in either mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicToolAdapter;

impl BlockingAdapter for DynamicToolAdapter {
    type Tool = DynamicTool<BlockingInvocation>;

    fn adapt(&self, descriptor: &ToolDescriptor, invocation: BlockingInvocation) -> Self::Tool {
        DynamicTool::new(descriptor, invocation)
    }
}

impl AsyncAdapter for DynamicToolAdapter {
    type Tool = DynamicTool<AsyncInvocation>;

    fn adapt_async(
        &self,
        descriptor: &ToolDescriptor,
        invocation: AsyncInvocation,
    ) -> Self::Tool {
        DynamicTool::new(descriptor, invocation)
    }
}
