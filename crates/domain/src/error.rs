use std::io;

/// The closed set of reasons a tool execution can fail or be short-circuited.
///
/// Carried in [`crate::tool::ToolExecutionResult::metadata`] as `error_reason`. Every variant
/// here is a control-flow outcome the Turn Engine knows how to fold back into the next LLM
/// round; adding a new kind of tool failure means adding a variant here, not stringifying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Denied,
    Edited,
    Aborted,
    Timeout,
    PermissionDenied,
    NotFound,
    ToolNotFound,
    InvalidInput,
    NetworkError,
    RateLimit,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Denied => "denied",
            ErrorReason::Edited => "edited",
            ErrorReason::Aborted => "aborted",
            ErrorReason::Timeout => "timeout",
            ErrorReason::PermissionDenied => "permission_denied",
            ErrorReason::NotFound => "not_found",
            ErrorReason::ToolNotFound => "tool_not_found",
            ErrorReason::InvalidInput => "invalid_input",
            ErrorReason::NetworkError => "network_error",
            ErrorReason::RateLimit => "rate_limit",
        }
    }
}

/// Domain-level error: things that can go wrong building or reading the data model itself,
/// as opposed to a tool's own runtime failure (see [`ErrorReason`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("duplicate message id: {0}")]
    DuplicateMessageId(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
