//! Tools: cron_set / cron_clear — let the model manage the single
//! persisted cron schedule.

use std::sync::Arc;

use async_trait::async_trait;

use mimi_scheduler::CronService;

use super::{Tool, ToolResult};

pub struct CronSetTool {
    cron: Arc<CronService>,
}

impl CronSetTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self { cron }
    }
}

#[async_trait]
impl Tool for CronSetTool {
    fn name(&self) -> &str {
        "cron_set"
    }

    fn description(&self) -> &str {
        "Set the recurring scheduled task (replaces any existing one). The \
         task text is executed by the assistant every interval_min minutes."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "interval_min": {
                    "type": "integer",
                    "description": "Interval in minutes, 1-1440."
                },
                "task": {
                    "type": "string",
                    "description": "What to do on each trigger."
                }
            },
            "required": ["interval_min", "task"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(interval) = input.get("interval_min").and_then(|v| v.as_u64()) else {
            return ToolResult::error("missing required parameter: interval_min");
        };
        let Some(task) = input.get("task").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: task");
        };
        let Ok(interval) = u16::try_from(interval) else {
            return ToolResult::error(format!("interval out of range: {interval}"));
        };
        match self.cron.set_schedule(interval, task) {
            Ok(()) => ToolResult::success(format!("cron schedule set: every {interval} min")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct CronClearTool {
    cron: Arc<CronService>,
}

impl CronClearTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self { cron }
    }
}

#[async_trait]
impl Tool for CronClearTool {
    fn name(&self) -> &str {
        "cron_clear"
    }

    fn description(&self) -> &str {
        "Remove the recurring scheduled task."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        match self.cron.clear_schedule() {
            Ok(()) => ToolResult::success("cron schedule cleared"),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
