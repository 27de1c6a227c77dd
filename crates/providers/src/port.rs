use ao_domain::{CancelToken, CompletionResult, ToolCall, ToolDefinition, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single provider-shaped content part. Distinct from [`ao_domain::ContentPart`]: this is the
/// wire shape an adapter sends to the model, already stripped of internal bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<String>,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message as sent over the wire to an LLM adapter, built by the Context Builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: Vec<ProviderContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ProviderMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ProviderMessage {
            role: ProviderRole::System,
            content: vec![ProviderContentPart::Text {
                text: text.into(),
                cache_control: None,
            }],
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: Vec<ProviderContentPart>) -> Self {
        ProviderMessage {
            role: ProviderRole::User,
            content,
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: Vec<ProviderContentPart>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        ProviderMessage {
            role: ProviderRole::Assistant,
            content,
            tool_call_id: None,
            name: None,
            tool_calls,
        }
    }

    pub fn tool(content: Vec<ProviderContentPart>, tool_call_id: String, name: String) -> Self {
        ProviderMessage {
            role: ProviderRole::Tool,
            content,
            tool_call_id: Some(tool_call_id),
            name: Some(name),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Function { name: String },
}

#[derive(Debug, Clone)]
pub struct ChatParams {
    pub messages: Vec<ProviderMessage>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub reasoning_effort: Option<String>,
    pub include_usage: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request cancelled")]
    Cancelled,
    #[error("provider {provider} error: {message}")]
    Provider { provider: String, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
}

/// Callbacks the LLM Port invokes while streaming. Default bodies are
/// no-ops so a caller only needs to implement the ones it cares about.
#[async_trait]
pub trait StreamCallbacks: Send + Sync {
    async fn on_chunk(&self, _delta: &str, _usage: Option<Usage>) {}
    async fn on_tool_call_delta(&self, _call_id: &str, _delta: &str) {}
    async fn on_stream_finish(&self, _reason: Option<String>, _usage: Option<Usage>) {}
}

/// The LLM Port: a single or streaming completion call, cooperatively cancellable.
/// Transport adapters (HTTP request shaping, provider auth) are external collaborators; this
/// crate only owns the contract and a deterministic mock used by the engine's own tests.
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn generate(
        &self,
        params: &ChatParams,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, ProviderError>;

    async fn stream(
        &self,
        params: &ChatParams,
        callbacks: &dyn StreamCallbacks,
        cancel: &CancelToken,
    ) -> Result<CompletionResult, ProviderError>;
}
