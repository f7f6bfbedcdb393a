//! Anthropic Messages API client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use mimi_core::config::LlmConfig;

use crate::provider::{
    ChatMessage, ChatModel, ChatReply, ProviderError, ToolCall, ToolDefinition,
};

const API_VERSION: &str = "2023-06-01";

/// Body markers that mean "bad credential" regardless of HTTP status.
const AUTH_ERROR_MARKERS: &[&str] = &["invalid x-api-key", "authentication_error", "invalid_api_key"];

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicModel {
    pub fn new(cfg: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        }
    }

    fn build_body(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }
        body
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatReply, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&self.build_body(system_prompt, messages, tools))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            if status == 401 || AUTH_ERROR_MARKERS.iter().any(|m| text.contains(m)) {
                return Err(ProviderError::Auth(text));
            }
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp))
    }
}

fn parse_response(resp: ApiResponse) -> ChatReply {
    let mut text_parts: Vec<String> = Vec::new();
    let mut calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            RespBlock::Text { text } => text_parts.push(text),
            RespBlock::ToolUse { id, name, input } => calls.push(ToolCall { id, name, input }),
            RespBlock::Unknown => {}
        }
    }

    ChatReply {
        text: text_parts.join(""),
        calls,
        stop_reason: resp.stop_reason.unwrap_or_default(),
    }
}

// API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<RespBlock>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RespBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_splits_text_and_calls() {
        let raw = serde_json::json!({
            "content": [
                { "type": "text", "text": "let me check" },
                { "type": "tool_use", "id": "tu_1", "name": "get_current_time", "input": {} }
            ],
            "stop_reason": "tool_use"
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        let reply = parse_response(resp);
        assert_eq!(reply.text, "let me check");
        assert_eq!(reply.calls.len(), 1);
        assert_eq!(reply.calls[0].name, "get_current_time");
        assert!(reply.wants_tools());
    }

    #[test]
    fn unknown_blocks_are_skipped() {
        let raw = serde_json::json!({
            "content": [
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "答案" }
            ],
            "stop_reason": "end_turn"
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        let reply = parse_response(resp);
        assert_eq!(reply.text, "答案");
        assert!(reply.calls.is_empty());
    }
}
