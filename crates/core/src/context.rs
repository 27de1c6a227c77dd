use ao_domain::{ContentPart, Message, MessageContent, Role};
use ao_providers::{ProviderContentPart, ProviderMessage, ProviderRole};

/// Assembles the `Vec<ProviderMessage>` handed to the LLM Port at the start of each round,
/// as a pure function of its inputs. It has no file-loading
/// or truncation budget to enforce — that belongs to an external workspace-context collaborator —
/// so it reduces to history replay plus an optional system
/// prompt prepended once.
pub trait ContextBuilderPort: Send + Sync {
    fn build(&self, system_prompt: Option<&str>, history: &[Message]) -> Vec<ProviderMessage>;
}

/// Replays stored [`Message`]s into provider wire format in order, prepending a system message
/// when one is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextBuilder;

impl ContextBuilderPort for DefaultContextBuilder {
    fn build(&self, system_prompt: Option<&str>, history: &[Message]) -> Vec<ProviderMessage> {
        let mut out = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = system_prompt {
            if !prompt.is_empty() {
                out.push(ProviderMessage::system(prompt));
            }
        }
        out.extend(history.iter().map(message_to_provider));
        out
    }
}

/// Maps one stored [`Message`] into the shape an [`ao_providers::LlmPort`] expects.
pub fn message_to_provider(message: &Message) -> ProviderMessage {
    let parts = message
        .content
        .as_ref()
        .map(content_to_provider_parts)
        .unwrap_or_default();

    match message.role {
        Role::User => ProviderMessage::user(parts),
        Role::Assistant => ProviderMessage::assistant(parts, message.tool_calls.clone()),
        Role::Tool => ProviderMessage::tool(
            parts,
            message.tool_call_id.clone().unwrap_or_default(),
            message.name.clone().unwrap_or_default(),
        ),
    }
}

fn content_to_provider_parts(content: &MessageContent) -> Vec<ProviderContentPart> {
    match content {
        MessageContent::Text(text) => vec![ProviderContentPart::Text {
            text: text.clone(),
            cache_control: None,
        }],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => ProviderContentPart::Text {
                    text: text.clone(),
                    cache_control: None,
                },
                ContentPart::Image { url, .. } => ProviderContentPart::ImageUrl {
                    url: url.clone(),
                    detail: None,
                },
            })
            .collect(),
    }
}
