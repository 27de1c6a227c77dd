use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;

/// One entry in the orchestrator's lifecycle event stream. This is the
/// stable ABI other processes observe; adding a new observable moment means adding a variant
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageStarted {
        conversation_id: String,
        message_id: String,
    },
    ToolCalls {
        conversation_id: String,
        message_id: String,
        tool_call_ids: Vec<String>,
    },
    ToolApprovalRequired {
        conversation_id: String,
        approval_id: String,
        tool_call_ids: Vec<String>,
    },
    ToolApprovalResponse {
        conversation_id: String,
        approval_id: String,
        decision: String,
    },
    ToolResult {
        conversation_id: String,
        tool_call_id: String,
        status: String,
    },
    AssistantChunk {
        conversation_id: String,
        message_id: String,
        delta: String,
    },
    AssistantMessage {
        conversation_id: String,
        message_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_cost_usd: Option<f64>,
    },
    StreamFinish {
        conversation_id: String,
        message_id: String,
    },
    MemoryAppended {
        conversation_id: String,
        message_ids: Vec<String>,
    },
    Done {
        conversation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_cost_usd: Option<f64>,
    },
    Error {
        conversation_id: String,
        reason: String,
        message: String,
    },
    SubAgentStarted {
        conversation_id: String,
        parent_conversation_id: String,
        agent_id: String,
    },
    SubAgentToolCall {
        conversation_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    SubAgentToolResult {
        conversation_id: String,
        tool_call_id: String,
        status: String,
    },
    SubAgentCompleted {
        conversation_id: String,
    },
    McpStderr {
        conversation_id: String,
        line: String,
    },
}

impl Event {
    /// Logs a structured event at info level independent of whether any consumer is
    /// subscribed.
    pub fn log(&self) {
        let payload: Value = serde_json::to_value(self).unwrap_or(Value::Null);
        tracing::info!(event = %payload, "ao_event");
    }

    /// The conversation this event belongs to. Every variant carries one; an event bus routes
    /// solely on this field so a subscriber never has to branch on the event kind to find it.
    pub fn conversation_id(&self) -> &str {
        match self {
            Event::MessageStarted { conversation_id, .. }
            | Event::ToolCalls { conversation_id, .. }
            | Event::ToolApprovalRequired { conversation_id, .. }
            | Event::ToolApprovalResponse { conversation_id, .. }
            | Event::ToolResult { conversation_id, .. }
            | Event::AssistantChunk { conversation_id, .. }
            | Event::AssistantMessage { conversation_id, .. }
            | Event::StreamFinish { conversation_id, .. }
            | Event::MemoryAppended { conversation_id, .. }
            | Event::Done { conversation_id, .. }
            | Event::Error { conversation_id, .. }
            | Event::SubAgentStarted { conversation_id, .. }
            | Event::SubAgentToolCall { conversation_id, .. }
            | Event::SubAgentToolResult { conversation_id, .. }
            | Event::SubAgentCompleted { conversation_id }
            | Event::McpStderr { conversation_id, .. } => conversation_id,
        }
    }
}

/// Narrow publish contract a tool execution context can hold without depending on the concrete
/// Event Bus implementation (kept in the orchestrator crate to avoid a dependency cycle).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event);
}
