pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;
pub mod tool;

pub use cancel::{CancelMap, CancelToken};
pub use config::{AgentConfig, ModelPricing};
pub use error::{Error, ErrorReason, Result};
pub use event::{Event, EventSink};
pub use message::{ContentPart, Message, MessageContent, Role, UserAttachment, UserMessagePayload};
pub use stream::{CompletionResult, StreamEvent, Usage};
pub use tool::{ToolCall, ToolDefinition, ToolExecutionResult, ToolInvocation, ToolStatus};
