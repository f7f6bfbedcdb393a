use serde::{Deserialize, Serialize};

use mimi_bus::Channel;

/// Threshold comparison direction for temperature rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Trigger when the reading is at or above the threshold (高于/超过/不低于).
    AtLeast,
    /// Trigger when the reading is at or below the threshold (低于/不高于).
    AtMost,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::AtLeast => ">=",
            Comparator::AtMost => "<=",
        }
    }

    pub fn matches(&self, reading_x10: i32, threshold_x10: i32) -> bool {
        match self {
            Comparator::AtLeast => reading_x10 >= threshold_x10,
            Comparator::AtMost => reading_x10 <= threshold_x10,
        }
    }
}

/// What a temperature rule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempAction {
    Remind { note: String },
    SetVolume { level: u8 },
}

/// A fully-bound control command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    GetVolume,
    SetVolume {
        target: i64,
        relative: bool,
        delta: i64,
    },
    Reboot {
        delay_ms: u64,
    },
    AlarmCreate {
        delay_ms: u64,
        note: String,
    },
    AlarmList,
    AlarmClear {
        alarm_id: Option<u32>,
    },
    TempRuleCreate {
        threshold_x10: i32,
        comparator: Comparator,
        action: TempAction,
    },
    TempRuleList,
    TempRuleClear {
        rule_id: Option<u32>,
    },
    PlayMusic {
        query: String,
    },
    StopMusic,
}

#[derive(Debug, Clone)]
pub struct ControlCommand {
    pub kind: CommandKind,
    pub request_id: String,
    /// Originating channel/chat, carried into alarm slots and replies.
    pub channel: Channel,
    pub chat_id: String,
}

/// Outcome handed back to the orchestrator. `handled == false` means the
/// message is not a control command and must go through the LLM flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlResult {
    pub handled: bool,
    pub success: bool,
    pub from_rule: bool,
    pub dedup_hit: bool,
    /// A timer was armed; the visible effect happens later.
    pub pending_action: bool,
    pub capability: String,
    pub request_id: String,
    /// Empty on silent successes (e.g. music playback).
    pub response_text: String,
    pub before_value: i64,
    pub after_value: i64,
}

/// One line of the control audit ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts_ms: i64,
    pub request_id: String,
    pub capability: String,
    pub success: bool,
    pub dedup_hit: bool,
    pub summary: String,
}

/// Read-model of an active alarm slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmInfo {
    pub alarm_id: u32,
    pub remaining_ms: u64,
    pub channel: Channel,
    pub chat_id: String,
    pub note: String,
}

/// Read-model of an active temperature rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempRuleInfo {
    pub rule_id: u32,
    pub threshold_x10: i32,
    pub comparator: Comparator,
    pub action: TempAction,
}
