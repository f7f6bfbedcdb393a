//! Tool: get_current_time. The model has no clock; anything date- or
//! time-sensitive must go through here.

use async_trait::async_trait;
use chrono::Local;

use super::{Tool, ToolResult};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time. Always call this when you need \
         to know the time or date — you do NOT have an internal clock."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let now = Local::now();
        ToolResult::success(now.format("%Y-%m-%d %H:%M:%S (%A)").to_string())
    }
}
