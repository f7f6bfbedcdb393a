//! Hand-written recognizers for voice-transcribed control commands.
//!
//! Attempted in order: reboot, alarm, temperature rule, music, volume.
//! A command is recognized iff a verb-category trigger and all required
//! fields are present; a recognized command with a missing value yields a
//! clarification instead of falling through to the LLM.
//!
//! Trigger vocabularies live in `const` tables so tuning a phrase never
//! touches control flow.

use mimi_bus::{BusMessage, Channel};

use crate::numbers::{parse_first_number_after, parse_last_number_before, parse_percent_value};
use crate::types::{CommandKind, Comparator, ControlCommand, TempAction};

/// Parse outcome for a recognized message.
#[derive(Debug, Clone)]
pub enum Parsed {
    Command(ControlCommand),
    /// Recognized, but a required value is missing; reply with `reason`.
    NeedsClarification {
        capability: &'static str,
        request_id: String,
        channel: Channel,
        chat_id: String,
        reason: String,
    },
}

const CONCEPTUAL_VOLUME: &[&str] = &["什么是音量", "音量是什么", "音量原理", "音量单位", "音量概念"];
const VOLUME_QUERY: &[&str] = &[
    "多少", "几", "当前", "现在", "查询", "查看", "告诉我", "是多少", "啥", "?",
];
const VOLUME_ABSOLUTE: &[&str] = &["调到", "调成", "设置", "设为", "改到", "改成", "变成", "开到"];
const VOLUME_INCREASE: &[&str] = &["增大", "增加", "调大", "大一点", "提高", "升高"];
const VOLUME_DECREASE: &[&str] = &["减小", "减少", "调小", "小一点", "降低", "调低"];

const ALARM_LIST: &[&str] = &["查看闹钟", "闹钟列表", "还有几个闹钟"];
const ALARM_CLEAR: &[&str] = &["取消闹钟", "清空闹钟", "删除闹钟"];

const TEMP_AT_LEAST: &[&str] = &["高于", "超过", "大于", "不低于"];
const TEMP_AT_MOST: &[&str] = &["低于", "小于", "不高于"];

const MUSIC_STOP: &[&str] = &["停止音乐", "暂停音乐", "关闭音乐", "停掉音乐", "停歌", "别放了"];
const MUSIC_PLAY: &[&str] = &["播放音乐", "放音乐", "来点音乐", "来首歌", "放首歌", "播一首"];

/// Try to parse a voice message into a control command.
///
/// `current_volume` is the live reading used to resolve relative volume
/// requests at recognition time.
pub fn parse_message(msg: &BusMessage, current_volume: u8) -> Option<Parsed> {
    parse_reboot(msg)
        .or_else(|| parse_alarm(msg))
        .or_else(|| parse_temp_rule(msg))
        .or_else(|| parse_music(msg))
        .or_else(|| parse_volume(msg, current_volume))
}

/// Derive a deduplication id: explicit `meta_json.request_id` when present,
/// otherwise a stable hash over the identifying fields.
pub fn build_request_id(msg: &BusMessage) -> String {
    if let Some(meta) = msg.meta_json.as_deref() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(meta) {
            if let Some(rid) = value.get("request_id").and_then(|v| v.as_str()) {
                if !rid.is_empty() {
                    return rid.to_string();
                }
            }
        }
    }

    let key = format!(
        "{}|{}|{}|{}",
        msg.channel,
        msg.chat_id,
        msg.media_type,
        msg.content
    );
    format!("auto-{:08x}", fnv1a32(&key))
}

fn fnv1a32(s: &str) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for b in s.bytes() {
        h ^= u32::from(b);
        h = h.wrapping_mul(16_777_619);
    }
    h
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| !k.is_empty() && text.contains(k))
}

fn command(msg: &BusMessage, kind: CommandKind) -> Parsed {
    Parsed::Command(ControlCommand {
        kind,
        request_id: build_request_id(msg),
        channel: msg.channel,
        chat_id: msg.chat_id.clone(),
    })
}

fn clarification(msg: &BusMessage, capability: &'static str, reason: &str) -> Parsed {
    Parsed::NeedsClarification {
        capability,
        request_id: build_request_id(msg),
        channel: msg.channel,
        chat_id: msg.chat_id.clone(),
        reason: reason.to_string(),
    }
}

fn parse_reboot(msg: &BusMessage) -> Option<Parsed> {
    let text = msg.content.as_str();
    if !text.contains("重启") || text.contains("不要重启") {
        return None;
    }

    let minutes = parse_last_number_before(text, "分钟后").filter(|v| *v > 0);
    let seconds = parse_last_number_before(text, "秒后").filter(|v| *v > 0);
    let delay_ms = match (minutes, seconds) {
        (Some(m), _) => u64::from(m) * 60_000,
        (None, Some(s)) => u64::from(s) * 1000,
        (None, None) => 2000,
    };

    Some(command(msg, CommandKind::Reboot { delay_ms }))
}

fn parse_alarm(msg: &BusMessage) -> Option<Parsed> {
    let text = msg.content.as_str();
    if !text.contains("闹钟") && !text.contains("提醒") {
        return None;
    }

    if contains_any(text, ALARM_LIST) {
        return Some(command(msg, CommandKind::AlarmList));
    }
    if contains_any(text, ALARM_CLEAR) {
        // The id may sit on either side of 闹钟 (2号闹钟 / 闹钟2).
        let alarm_id = parse_last_number_before(text, "闹钟")
            .or_else(|| parse_first_number_after(text, "闹钟"))
            .filter(|v| *v > 0);
        return Some(command(msg, CommandKind::AlarmClear { alarm_id }));
    }

    let minutes = parse_last_number_before(text, "分钟后").filter(|v| *v > 0);
    let seconds = parse_last_number_before(text, "秒后").filter(|v| *v > 0);
    let delay_ms = match (minutes, seconds) {
        (Some(m), _) => u64::from(m) * 60_000,
        (None, Some(s)) => u64::from(s) * 1000,
        // An explicit delay token is required for creation; without one this
        // is conversation, not a command.
        (None, None) => return None,
    };

    let note = extract_note_after(text, "提醒").unwrap_or("时间到了。");
    Some(command(
        msg,
        CommandKind::AlarmCreate {
            delay_ms,
            note: note.to_string(),
        },
    ))
}

fn parse_temp_rule(msg: &BusMessage) -> Option<Parsed> {
    let text = msg.content.as_str();
    if !text.contains("温度") {
        return None;
    }

    let about_rules = text.contains("温度规则");
    let list_rule = about_rules && contains_any(text, &["查看", "列表", "多少"]);
    let clear_rule = about_rules && contains_any(text, &["清空", "删除", "取消"]);
    let set_rule = (text.contains("规则") || text.contains("温度"))
        && (contains_any(text, TEMP_AT_LEAST) || contains_any(text, TEMP_AT_MOST))
        && (text.contains("提醒") || text.contains("音量"));
    if !list_rule && !clear_rule && !set_rule {
        return None;
    }

    if list_rule {
        return Some(command(msg, CommandKind::TempRuleList));
    }
    if clear_rule {
        let rule_id = parse_last_number_before(text, "规则")
            .or_else(|| parse_first_number_after(text, "规则"))
            .filter(|v| *v > 0);
        return Some(command(msg, CommandKind::TempRuleClear { rule_id }));
    }

    let celsius = parse_last_number_before(text, "摄氏度")
        .or_else(|| parse_last_number_before(text, "度"))
        .or_else(|| parse_last_number_before(text, "℃"));
    let Some(celsius) = celsius else {
        return Some(clarification(
            msg,
            "temp_rule_create",
            "未识别到温度阈值，请说例如“温度高于30度时音量调到40%”。",
        ));
    };
    let threshold_x10 = celsius as i32 * 10;

    // 不低于 embeds 低于, so the at-least set must be checked first.
    let comparator = if contains_any(text, TEMP_AT_LEAST) {
        Comparator::AtLeast
    } else if contains_any(text, TEMP_AT_MOST) {
        Comparator::AtMost
    } else {
        return Some(clarification(
            msg,
            "temp_rule_create",
            "未识别到比较条件，请使用“高于/低于”。",
        ));
    };

    let action = if text.contains("音量") {
        let Some(volume) = parse_percent_value(text) else {
            return Some(clarification(
                msg,
                "temp_rule_create",
                "未识别到目标音量，请说例如“音量调到40%”。",
            ));
        };
        TempAction::SetVolume {
            level: volume.min(100) as u8,
        }
    } else {
        let note = extract_note_after(text, "提醒").unwrap_or("温度事件触发");
        TempAction::Remind {
            note: note.to_string(),
        }
    };

    Some(command(
        msg,
        CommandKind::TempRuleCreate {
            threshold_x10,
            comparator,
            action,
        },
    ))
}

fn parse_music(msg: &BusMessage) -> Option<Parsed> {
    let text = msg.content.as_str();
    let is_stop = contains_any(text, MUSIC_STOP);
    let is_play = contains_any(text, MUSIC_PLAY);
    if !is_stop && !is_play {
        return None;
    }
    if is_stop {
        return Some(command(msg, CommandKind::StopMusic));
    }

    let mut query = text;
    for phrase in MUSIC_PLAY {
        if let Some(pos) = text.find(phrase) {
            query = &text[pos + phrase.len()..];
            break;
        }
    }
    let query = query
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | '?' | '。' | '！' | '？'));
    let query = if query.is_empty() { "轻音乐" } else { query };

    Some(command(
        msg,
        CommandKind::PlayMusic {
            query: query.to_string(),
        },
    ))
}

fn parse_volume(msg: &BusMessage, current_volume: u8) -> Option<Parsed> {
    let text = msg.content.as_str();
    if !text.contains("音量") {
        return None;
    }
    // Conceptual questions about volume are for the LLM, not the mixer.
    if contains_any(text, CONCEPTUAL_VOLUME) {
        return None;
    }

    let ask_query = contains_any(text, VOLUME_QUERY);
    let is_absolute = contains_any(text, VOLUME_ABSOLUTE);
    let is_increase = contains_any(text, VOLUME_INCREASE);
    let is_decrease = contains_any(text, VOLUME_DECREASE);
    let has_adjust_verb = is_absolute
        || is_increase
        || is_decrease
        || text.contains("静音")
        || text.contains("最大")
        || text.contains("最小");

    if !has_adjust_verb {
        if ask_query {
            return Some(command(msg, CommandKind::GetVolume));
        }
        return None;
    }

    if text.contains("静音") || text.contains("最小") {
        return Some(command(
            msg,
            CommandKind::SetVolume {
                target: 0,
                relative: false,
                delta: 0,
            },
        ));
    }
    if text.contains("最大") {
        return Some(command(
            msg,
            CommandKind::SetVolume {
                target: 100,
                relative: false,
                delta: 0,
            },
        ));
    }

    let value = match parse_percent_value(text) {
        Some(v) => v,
        // 调大/调小 with no amount defaults to a 10-point step.
        None if is_increase || is_decrease => 10,
        None => {
            return Some(clarification(
                msg,
                "set_volume",
                "未识别到目标音量，请说例如“调到30%”或“减小10%”。",
            ));
        }
    };

    if is_increase || is_decrease {
        let base = i64::from(current_volume);
        let delta = i64::from(value.min(100));
        let target = if is_increase { base + delta } else { base - delta };
        return Some(command(
            msg,
            CommandKind::SetVolume {
                target: target.clamp(0, 100),
                relative: true,
                delta: if is_increase { delta } else { -delta },
            },
        ));
    }

    Some(command(
        msg,
        CommandKind::SetVolume {
            target: i64::from(value).clamp(0, 100),
            relative: false,
            delta: 0,
        },
    ))
}

/// Note text after a marker word, skipping spaces and a leading 我.
/// `None` when the marker is absent or nothing follows it.
fn extract_note_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let pos = text.find(marker)?;
    let mut rest = text[pos + marker.len()..].trim_start_matches([' ', '\t']);
    if let Some(stripped) = rest.strip_prefix('我') {
        rest = stripped.trim_start_matches([' ', '\t']);
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
