//! Wire types and tolerant parsing for inbound platform deliveries.

use serde::Deserialize;

/// A single inbound event from the platform envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub reply_token: Option<String>,

    #[serde(default)]
    pub source: Option<Source>,

    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub text: Option<String>,
}

/// Parse the events out of a raw delivery body.
///
/// Returns `None` only when the body is not valid JSON. Individual events
/// that fail to deserialize are skipped, never fatal — a bad event must not
/// take down its batch siblings.
pub fn parse_events(body: &[u8]) -> Option<Vec<Event>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let Some(raw_events) = value.get("events").and_then(|v| v.as_array()) else {
        return Some(Vec::new());
    };

    let events = raw_events
        .iter()
        .filter_map(|raw| match serde_json::from_value(raw.clone()) {
            Ok(event) => Some(event),
            Err(error) => {
                tracing::debug!(%error, "skipping malformed event");
                None
            }
        })
        .collect();
    Some(events)
}

/// Message kind dispatch categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Sticker,
    Image,
    /// Audio, video, and file messages get a fixed redirect-to-text reply.
    Unsupported,
    /// Anything else is silently ignored.
    Unknown,
}

impl MessageKind {
    pub fn classify(kind: &str) -> Self {
        match kind {
            "text" => MessageKind::Text,
            "sticker" => MessageKind::Sticker,
            "image" => MessageKind::Image,
            "audio" | "video" | "file" => MessageKind::Unsupported,
            _ => MessageKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Sticker => "sticker",
            MessageKind::Image => "image",
            MessageKind::Unsupported => "unsupported",
            MessageKind::Unknown => "unknown",
        }
    }
}
