use std::sync::Arc;

use ao_domain::{CancelToken, EventSink, ToolDefinition, ToolExecutionResult, ToolInvocation};
use async_trait::async_trait;

/// Everything a tool needs besides its own parsed parameters: who is asking, which turn this
/// is part of, a handle to publish sub-agent events, and the cooperative cancel signal for the
/// surrounding turn.
#[derive(Clone)]
pub struct ToolContext {
    pub conversation_id: String,
    pub agent_id: String,
    pub message_id: String,
    pub events: Arc<dyn EventSink>,
    pub cancel: CancelToken,
}

/// The contract every tool implements. A tool never sees the Approval Gate, the memory store,
/// or the Turn Engine directly; it only sees its own invocation and the context above.
///
/// ```
/// use ao_domain::{ToolDefinition, ToolExecutionResult, ToolInvocation};
/// use ao_tools::{Tool, ToolContext};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Tool for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn spec(&self) -> ToolDefinition {
///         ToolDefinition {
///             name: "echo".into(),
///             description: "Echoes its input back.".into(),
///             parameters: serde_json::json!({"type": "object", "properties": {}}),
///         }
///     }
///
///     async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
///         ToolExecutionResult::success(invocation.id.clone(), "echo", "ok")
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolDefinition;
    async fn call(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> ToolExecutionResult;
}
