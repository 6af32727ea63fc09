//! `LlmMessage` (§3.2): the value type carried in every conversation and
//! every durable `LlmCall` record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a multi-part message. Text is the overwhelmingly common
/// case; the others exist for multimodal and thinking-model providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text { text: String },
    Image { url: String, mime_type: Option<String> },
    File { name: String, mime_type: String, data_base64: String },
    Reasoning { text: String },
    RedactedReasoning { data: String },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    /// Rough serialized length, used when estimating how a message's share
    /// of a chunk envelope will behave (§4.4).
    pub fn approx_len(&self) -> usize {
        match self {
            MessagePart::Text { text } => text.len(),
            MessagePart::Image { url, .. } => url.len(),
            MessagePart::File { data_base64, .. } => data_base64.len(),
            MessagePart::Reasoning { text } => text.len(),
            MessagePart::RedactedReasoning { data } => data.len(),
        }
    }
}

/// `content` is either a plain string or an ordered sequence of parts (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

impl MessageContent {
    pub fn approx_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.len(),
            MessageContent::Parts(parts) => parts.iter().map(MessagePart::approx_len).sum(),
        }
    }

    /// Flattened text content, concatenating all text-bearing parts.
    /// Used by the tokenizer and by fingerprinting-adjacent code that only
    /// cares about the textual content of a message.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::Text { text } => Some(text.as_str()),
                    MessagePart::Reasoning { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMarker {
    Ephemeral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStats {
    pub request_time: Option<i64>,
    pub time_to_first_token: Option<i64>,
    pub total_time: Option<i64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost: Option<f64>,
    pub llm_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MessageStats>,
}

impl LlmMessage {
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            cache: None,
            stats: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(MessageRole::System, text)
    }

    pub fn approx_len(&self) -> usize {
        self.content.approx_len() + 32 // envelope slack: role tag, cache marker, stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_round_trips_through_json() {
        let msg = LlmMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content.as_text(), "hello");
        assert_eq!(back.role, MessageRole::User);
    }

    #[test]
    fn parts_content_flattens_text_parts_for_as_text() {
        let msg = LlmMessage {
            role: MessageRole::Assistant,
            content: MessageContent::Parts(vec![
                MessagePart::text("first"),
                MessagePart::Image {
                    url: "http://example.invalid/a.png".into(),
                    mime_type: None,
                },
                MessagePart::text("second"),
            ]),
            cache: None,
            stats: None,
        };
        assert_eq!(msg.content.as_text(), "first\nsecond");
    }
}
