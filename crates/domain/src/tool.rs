use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ErrorReason;

/// A tool call as the model emitted it: arguments are kept as an unparsed JSON string so the
/// engine can fold the call back into a provider payload bit-exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// The catalog entry a provider sees: name, description, and a JSON-Schema parameter shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call after argument parsing, ready for dispatch. `edit_instruction` is populated only
/// when the approval decision was `edit`.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub parameters: HashMap<String, Value>,
    pub edit_instruction: Option<String>,
}

impl ToolInvocation {
    /// Parses a [`ToolCall`]'s argument string into a [`ToolInvocation`]. Malformed JSON does
    /// not fail the batch; it yields an empty parameter map.
    pub fn from_call(call: &ToolCall, edit_instruction: Option<String>) -> Self {
        let parameters = serde_json::from_str::<HashMap<String, Value>>(&call.function.arguments)
            .unwrap_or_default();
        ToolInvocation {
            id: call.id.clone(),
            name: call.function.name.clone(),
            parameters,
            edit_instruction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultType {
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
}

/// The outcome of running one [`ToolInvocation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    #[serde(rename = "type")]
    pub result_type: ToolResultType,
    pub result: String,
    #[serde(default)]
    pub metadata: ToolResultMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolExecutionResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, result: impl Into<String>) -> Self {
        ToolExecutionResult {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Success,
            result_type: ToolResultType::Text,
            result: result.into(),
            metadata: ToolResultMetadata::default(),
            duration_ms: None,
        }
    }

    pub fn success_json(id: impl Into<String>, name: impl Into<String>, result: impl Into<String>) -> Self {
        ToolExecutionResult {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Success,
            result_type: ToolResultType::Json,
            result: result.into(),
            metadata: ToolResultMetadata::default(),
            duration_ms: None,
        }
    }

    pub fn error(
        id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
        reason: ErrorReason,
    ) -> Self {
        ToolExecutionResult {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Error,
            result_type: ToolResultType::Text,
            result: result.into(),
            metadata: ToolResultMetadata {
                error_reason: Some(reason),
            },
            duration_ms: None,
        }
    }

    /// An error result with no taxonomy entry to assign it — reserved for failures outside the
    /// closed `ErrorReason` set, such as a tool task panicking.
    pub fn error_plain(id: impl Into<String>, name: impl Into<String>, result: impl Into<String>) -> Self {
        ToolExecutionResult {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Error,
            result_type: ToolResultType::Text,
            result: result.into(),
            metadata: ToolResultMetadata::default(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, ToolStatus::Error)
    }
}
