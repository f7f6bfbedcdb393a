//! LLM provider abstraction.
//!
//! The on-wire conversation is a list of messages whose content is either
//! plain text or an array of tagged blocks (`text`, `tool_use`,
//! `tool_result`). Both shapes are modeled as sum types and serialized by
//! serde, so the orchestrator never assembles raw JSON object graphs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One tagged block inside a structured message content array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Message content: a bare string for ordinary turns, a block array for
/// tool traffic. Serializes to exactly the wire shape either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant turn carrying the reply text (when present) plus one
    /// tool_use block per requested call.
    pub fn assistant_tool_use(reply: &ChatReply) -> Self {
        let mut blocks = Vec::with_capacity(reply.calls.len() + 1);
        if !reply.text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: reply.text.clone(),
            });
        }
        for call in &reply.calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// User turn carrying tool_result blocks.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Non-streaming provider reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub calls: Vec<ToolCall>,
    pub stop_reason: String,
}

impl ChatReply {
    pub fn wants_tools(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Common interface for chat models with tool use.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn chat_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatReply, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credential rejected (HTTP 401 or an authentication-flavored body).
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),
}
