//! Tools: get_volume / set_volume — the speaker loudness pair the runtime
//! hints at for voice-originated volume questions.

use std::sync::Arc;

use async_trait::async_trait;

use mimi_core::device::VolumeSink;

use super::{Tool, ToolResult};

pub struct GetVolumeTool {
    volume: Arc<dyn VolumeSink>,
}

impl GetVolumeTool {
    pub fn new(volume: Arc<dyn VolumeSink>) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl Tool for GetVolumeTool {
    fn name(&self) -> &str {
        "get_volume"
    }

    fn description(&self) -> &str {
        "Get the current speaker volume percentage (0-100)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        ToolResult::success(self.volume.get().to_string())
    }
}

pub struct SetVolumeTool {
    volume: Arc<dyn VolumeSink>,
}

impl SetVolumeTool {
    pub fn new(volume: Arc<dyn VolumeSink>) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl Tool for SetVolumeTool {
    fn name(&self) -> &str {
        "set_volume"
    }

    fn description(&self) -> &str {
        "Set speaker volume (0-100) for voice playback loudness."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "level": {
                    "type": "integer",
                    "description": "Target volume percentage, 0-100."
                }
            },
            "required": ["level"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(level) = input.get("level").and_then(|v| v.as_u64()) else {
            return ToolResult::error("missing required parameter: level");
        };
        if level > 100 {
            return ToolResult::error(format!("level out of range (0-100): {level}"));
        }
        self.volume.set(level as u8);
        let actual = self.volume.get();
        ToolResult::success(format!("volume set to {actual}"))
    }
}
