//! Static capability table: one record per command kind with its name,
//! execution timeout, retry policy, and argument validation.
//!
//! No capability currently retries; the field is kept for hardware-backed
//! capabilities where a transient bus error is worth a second attempt.

use crate::error::{ControlError, Result};
use crate::types::{CommandKind, TempAction};

pub(crate) struct CapabilitySpec {
    pub name: &'static str,
    pub timeout_ms: u64,
    pub retry_max: u8,
}

pub(crate) fn spec_for(kind: &CommandKind) -> CapabilitySpec {
    match kind {
        CommandKind::GetVolume => CapabilitySpec {
            name: "get_volume",
            timeout_ms: 500,
            retry_max: 0,
        },
        CommandKind::SetVolume { .. } => CapabilitySpec {
            name: "set_volume",
            timeout_ms: 500,
            retry_max: 0,
        },
        CommandKind::Reboot { .. } => CapabilitySpec {
            name: "reboot",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::AlarmCreate { .. } => CapabilitySpec {
            name: "alarm_create",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::AlarmList => CapabilitySpec {
            name: "alarm_list",
            timeout_ms: 500,
            retry_max: 0,
        },
        CommandKind::AlarmClear { .. } => CapabilitySpec {
            name: "alarm_clear",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::TempRuleCreate { .. } => CapabilitySpec {
            name: "temp_rule_create",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::TempRuleList => CapabilitySpec {
            name: "temp_rule_list",
            timeout_ms: 500,
            retry_max: 0,
        },
        CommandKind::TempRuleClear { .. } => CapabilitySpec {
            name: "temp_rule_clear",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::PlayMusic { .. } => CapabilitySpec {
            name: "play_music",
            timeout_ms: 1000,
            retry_max: 0,
        },
        CommandKind::StopMusic => CapabilitySpec {
            name: "stop_music",
            timeout_ms: 1000,
            retry_max: 0,
        },
    }
}

/// Convert invalid arguments to a typed error before execution runs.
pub(crate) fn validate(kind: &CommandKind) -> Result<()> {
    match kind {
        CommandKind::SetVolume { target, .. } => {
            if !(0..=100).contains(target) {
                return Err(ControlError::InvalidArgument(format!(
                    "目标音量超出范围(0-100): {target}"
                )));
            }
            Ok(())
        }
        CommandKind::Reboot { delay_ms } => {
            if !(500..=3_600_000).contains(delay_ms) {
                return Err(ControlError::InvalidArgument(format!(
                    "重启延迟非法: {delay_ms}ms"
                )));
            }
            Ok(())
        }
        CommandKind::AlarmCreate { delay_ms, .. } => {
            if !(1000..=86_400_000).contains(delay_ms) {
                return Err(ControlError::InvalidArgument(format!(
                    "闹钟延迟非法: {delay_ms}ms"
                )));
            }
            Ok(())
        }
        CommandKind::TempRuleCreate {
            threshold_x10,
            action,
            ..
        } => {
            if !(-500..=1200).contains(threshold_x10) {
                return Err(ControlError::InvalidArgument(format!(
                    "温度阈值超出范围(-50.0~120.0°C): {}.{}",
                    threshold_x10 / 10,
                    (threshold_x10 % 10).abs()
                )));
            }
            if let TempAction::SetVolume { level } = action {
                if *level > 100 {
                    return Err(ControlError::InvalidArgument(format!(
                        "目标音量无效: {level}"
                    )));
                }
            }
            Ok(())
        }
        CommandKind::PlayMusic { query } => {
            if query.is_empty() {
                return Err(ControlError::InvalidArgument("音乐内容为空".to_string()));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
