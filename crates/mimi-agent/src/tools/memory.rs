//! Tools: memory_write_long_term / memory_append_today — the only write
//! paths into durable assistant memory.

use std::sync::Arc;

use async_trait::async_trait;

use mimi_memory::MemoryStore;

use super::{Tool, ToolResult};

pub struct MemoryWriteLongTermTool {
    memory: Arc<MemoryStore>,
}

impl MemoryWriteLongTermTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryWriteLongTermTool {
    fn name(&self) -> &str {
        "memory_write_long_term"
    }

    fn description(&self) -> &str {
        "Overwrite the long-term memory file with organized durable facts. \
         Keep it concise — summarize, don't dump raw conversation."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The full new content of long-term memory."
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };
        match self.memory.write_long_term(content) {
            Ok(()) => ToolResult::success(format!("long-term memory updated ({} bytes)", content.len())),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct MemoryAppendTodayTool {
    memory: Arc<MemoryStore>,
}

impl MemoryAppendTodayTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryAppendTodayTool {
    fn name(&self) -> &str {
        "memory_append_today"
    }

    fn description(&self) -> &str {
        "Append a concise note to today's daily memory file."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "description": "One short note worth remembering."
                }
            },
            "required": ["note"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(note) = input.get("note").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: note");
        };
        if note.trim().is_empty() {
            return ToolResult::error("note is empty");
        }
        match self.memory.append_today(note) {
            Ok(()) => ToolResult::success("note appended to today's memory"),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
