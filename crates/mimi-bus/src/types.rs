use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of system-generated status text ("mimi… is working...").
pub const STATUS_PREFIX: &str = "mimi";
/// Ellipsis token that must also be present for text to count as a status.
pub const STATUS_ELLIPSIS: &str = "...";

/// Logical channel a message arrived on (and returns to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Websocket,
    Cli,
    Voice,
    System,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Websocket => "websocket",
            Channel::Cli => "cli",
            Channel::Voice => "voice",
            Channel::System => "system",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Channel::Telegram),
            "websocket" => Ok(Channel::Websocket),
            "cli" => Ok(Channel::Cli),
            "voice" => Ok(Channel::Voice),
            "system" => Ok(Channel::System),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// What kind of payload the message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Text,
    Voice,
    Photo,
    Document,
    Media,
    System,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Voice => "voice",
            MediaType::Photo => "photo",
            MediaType::Document => "document",
            MediaType::Media => "media",
            MediaType::System => "system",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the bus. Owned by exactly one holder at a time: pushing
/// moves it into the queue, popping moves it out, and a failed push hands
/// it back through [`BusError::QueueFull`](crate::error::BusError).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub channel: Channel,
    /// Conversation id on that channel (Telegram chat id, WS client id, …).
    pub chat_id: String,
    #[serde(default)]
    pub media_type: MediaType,
    /// Source media file id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Source media path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub content: String,
    /// Opaque serialized metadata (may carry an explicit request_id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_json: Option<String>,
}

impl BusMessage {
    /// A plain text message with no attachments or metadata.
    pub fn text(channel: Channel, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
            media_type: MediaType::Text,
            file_id: None,
            file_path: None,
            content: content.into(),
            meta_json: None,
        }
    }

    /// Whether the content is a system-generated status line. Statuses are
    /// enqueued one-shot and never spoken on the voice channel.
    pub fn is_status(&self) -> bool {
        self.content.starts_with(STATUS_PREFIX) && self.content.contains(STATUS_ELLIPSIS)
    }
}
