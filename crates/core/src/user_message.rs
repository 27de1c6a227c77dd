use std::collections::HashSet;

use ao_domain::{ContentPart, MessageContent, UserAttachment, UserMessagePayload};

use crate::reminders::ReminderPort;

/// Builds the content and UI display text for a new user message. This
/// is a pure function of its inputs plus whatever the reminders port decides to inject — it has
/// no knowledge of memory, ids, or timestamps; the Turn Engine wraps the returned
/// [`MessageContent`] into a [`ao_domain::Message`] itself.
pub fn build_user_message(
    payload: &UserMessagePayload,
    reminders: &dyn ReminderPort,
) -> (MessageContent, String) {
    let (text, display_text, attachments) = normalize(payload);

    let enhanced = reminders.decorate(&text).join("\n");
    let parts = thread_attachments(&enhanced, &attachments);
    let content = collapse(parts);

    let display = match display_text {
        Some(d) if !d.is_empty() => d,
        _ => substitute_placeholders(&text, &attachments),
    };

    (content, display)
}

fn normalize(payload: &UserMessagePayload) -> (String, Option<String>, Vec<UserAttachment>) {
    match payload {
        UserMessagePayload::Plain(text) => (text.clone(), None, Vec::new()),
        UserMessagePayload::Rich {
            text,
            display_text,
            attachments,
        } => (text.clone(), display_text.clone(), attachments.clone()),
    }
}

/// Walks `enhanced` left to right, splicing in each attachment at its token's position.
/// Attachments with no token, or whose token never occurs in the
/// text, are appended as trailing image parts in their original order.
fn thread_attachments(enhanced: &str, attachments: &[UserAttachment]) -> Vec<ContentPart> {
    let all_tokens: Vec<&str> = attachments.iter().filter_map(|a| a.token.as_deref()).collect();

    let mut parts = Vec::new();
    let mut matched: HashSet<usize> = HashSet::new();
    let mut cursor = 0usize;

    loop {
        let next = attachments
            .iter()
            .enumerate()
            .filter(|(idx, _)| !matched.contains(idx))
            .filter_map(|(idx, att)| {
                let token = att.token.as_deref()?;
                let rel_pos = enhanced[cursor..].find(token)?;
                Some((cursor + rel_pos, cursor + rel_pos + token.len(), idx))
            })
            .min_by_key(|(pos, _, _)| *pos);

        let Some((pos, end, idx)) = next else { break };

        let mut before = enhanced[cursor..pos].to_string();
        strip_other_tokens(&mut before, &all_tokens);
        if !before.is_empty() {
            parts.push(ContentPart::Text { text: before });
        }
        parts.push(image_part(&attachments[idx]));
        matched.insert(idx);
        cursor = end;
    }

    let mut tail = enhanced[cursor..].to_string();
    strip_other_tokens(&mut tail, &all_tokens);
    if !tail.is_empty() {
        parts.push(ContentPart::Text { text: tail });
    }

    for (idx, att) in attachments.iter().enumerate() {
        if !matched.contains(&idx) {
            parts.push(image_part(att));
        }
    }

    parts
}

fn image_part(att: &UserAttachment) -> ContentPart {
    ContentPart::Image {
        url: att.url.clone(),
        media_type: att.media_type.clone(),
        alt_text: att.alt_text.clone(),
        name: att.name.clone(),
    }
}

fn strip_other_tokens(s: &mut String, tokens: &[&str]) {
    for token in tokens {
        if !token.is_empty() && s.contains(token) {
            *s = s.replace(token, "");
        }
    }
}

fn collapse(parts: Vec<ContentPart>) -> MessageContent {
    match <[ContentPart; 1]>::try_from(parts) {
        Ok([ContentPart::Text { text }]) => MessageContent::Text(text),
        Ok([part]) => MessageContent::Parts(vec![part]),
        Err(parts) if parts.is_empty() => MessageContent::text(""),
        Err(parts) => MessageContent::Parts(parts),
    }
}

fn substitute_placeholders(text: &str, attachments: &[UserAttachment]) -> String {
    let mut out = text.to_string();
    for (idx, att) in attachments.iter().enumerate() {
        let Some(token) = &att.token else { continue };
        let label = att
            .name
            .clone()
            .or_else(|| att.alt_text.clone())
            .unwrap_or_else(|| idx.to_string());
        out = out.replace(token.as_str(), &format!("[image:{label}]"));
    }
    out
}
