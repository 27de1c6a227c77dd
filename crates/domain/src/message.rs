use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single content part inside a [`MessageContent::Parts`] list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        url: String,
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alt_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// The body of a [`Message`]. `None` is legal only for assistant messages that carried tool
/// calls and no accompanying text (data-model invariant 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(s: impl Into<String>) -> Self {
        MessageContent::Text(s.into())
    }

    /// Concatenates every text part; images are skipped. Used for logging and for providers
    /// that cannot take multi-part content.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(t) => t.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

/// An entry in a conversation's append-only log. A whole conversation's sequence of these
/// must read user/assistant/tool roles in a consistent order; those invariants are
/// enforced by the memory store, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<String>, content: MessageContent, timestamp: DateTime<Utc>) -> Self {
        Message {
            id: id.into(),
            role: Role::User,
            content: Some(content),
            timestamp,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_text(id: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Message {
            id: id.into(),
            role: Role::Assistant,
            content: Some(MessageContent::text(text)),
            timestamp,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_tool_calls(
        id: impl Into<String>,
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Message {
            id: id.into(),
            role: Role::Assistant,
            content: text.map(MessageContent::text),
            timestamp,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Message {
            id: id.into(),
            role: Role::Tool,
            content: Some(MessageContent::text(content)),
            timestamp,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// One image supplied alongside a user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAttachment {
    pub url: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A unique placeholder substring marking this attachment's position in `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// The shape a caller hands to `send`: either a plain string, or text plus attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserMessagePayload {
    Plain(String),
    Rich {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_text: Option<String>,
        #[serde(default)]
        attachments: Vec<UserAttachment>,
    },
}

impl UserMessagePayload {
    pub fn text(&self) -> &str {
        match self {
            UserMessagePayload::Plain(t) => t,
            UserMessagePayload::Rich { text, .. } => text,
        }
    }
}
