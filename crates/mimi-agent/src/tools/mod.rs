//! Device-local tools exposed to the LLM.
//!
//! The registry's contract towards the orchestrator is minimal: execute by
//! name with the model-produced JSON input, get text back. Per-tool input
//! validation lives in the tools; bytes accounting and truncation are the
//! orchestrator's job.

pub mod cron;
pub mod files;
pub mod memory;
pub mod search;
pub mod time;
pub mod volume;

use async_trait::async_trait;
use tracing::debug;

use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "get_current_time").
    fn name(&self) -> &str;
    /// Description shown to the LLM.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input.
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// API-level definitions for the LLM request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute by name. Unknown tools and tool errors both come back as
    /// text so the LLM can observe and recover.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> String {
        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => {
                debug!(tool = name, "executing tool");
                let result = tool.execute(input).await;
                if result.is_error && !result.content.starts_with("Error") {
                    format!("Error: {}", result.content)
                } else {
                    result.content
                }
            }
            None => format!("Error: unknown tool: {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }

        async fn execute(&self, input: serde_json::Value) -> ToolResult {
            match input.get("text").and_then(|v| v.as_str()) {
                Some(t) => ToolResult::success(t),
                None => ToolResult::error("missing required parameter: text"),
            }
        }
    }

    #[tokio::test]
    async fn executes_by_name_and_flags_errors_as_text() {
        let registry = ToolRegistry::new(vec![Box::new(EchoTool)]);
        assert_eq!(
            registry.execute("echo", serde_json::json!({"text": "hi"})).await,
            "hi"
        );
        assert_eq!(
            registry.execute("echo", serde_json::json!({})).await,
            "Error: missing required parameter: text"
        );
        assert_eq!(
            registry.execute("nope", serde_json::json!({})).await,
            "Error: unknown tool: nope"
        );
    }

    #[test]
    fn definitions_expose_schemas() {
        let registry = ToolRegistry::new(vec![Box::new(EchoTool)]);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].input_schema["type"], "object");
    }
}
