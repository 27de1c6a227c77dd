mod mock;
mod port;

pub use mock::{ScriptedResponse, MockLlmProvider};
pub use port::{
    ChatParams, LlmPort, ProviderContentPart, ProviderError, ProviderMessage, ProviderRole,
    StreamCallbacks, ToolChoice,
};
