use thiserror::Error;

/// The engine's own closed error set, distinct from [`ao_domain::ErrorReason`]: this covers
/// failures of the turn itself rather than a single tool's outcome.
///
/// Only [`EngineError::LlmFailed`] and [`EngineError::RoundLimitExceeded`] are expected to
/// reach a caller in normal operation. [`EngineError::Invariant`] is reserved for programming
/// errors the engine detects in itself (malformed internal state); it should never surface
/// outside a test that deliberately corrupts that state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("turn cancelled")]
    Cancelled,

    #[error("llm call failed: {0}")]
    LlmFailed(String),

    #[error("turn exceeded the maximum number of tool-call rounds")]
    RoundLimitExceeded,

    #[error("invariant violation: {0}")]
    Invariant(String),
}
