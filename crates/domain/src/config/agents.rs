use serde::{Deserialize, Serialize};

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tool_concurrency() -> usize {
    3
}

fn default_require_tool_approval() -> bool {
    true
}

/// Per-agent configuration driving one conversation's Turn Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub system_prompt: String,
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub enabled_tools: Vec<String>,

    #[serde(default = "default_max_tool_concurrency")]
    pub max_tool_concurrency: usize,

    #[serde(default = "default_require_tool_approval")]
    pub require_tool_approval: bool,

    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        AgentConfig {
            id: id.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: None,
            enabled_tools: Vec::new(),
            max_tool_concurrency: default_max_tool_concurrency(),
            require_tool_approval: default_require_tool_approval(),
            reasoning_effort: None,
        }
    }
}
