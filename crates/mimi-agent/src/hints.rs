//! File-driven, TTL-reloaded augmentations applied to user content before
//! LLM submission: route hints keyed by channel × media type, skill hints
//! with priority selection, a runtime hint for voice volume questions, and
//! the message-metadata block for non-text attachments.
//!
//! Config syntax (inside the bootstrap files, so no extra files to ship):
//! - `TOOLS.md`:  `route.<media>: <instruction>`
//! - `SKILLS.md`: `when.media_type=voice,priority=80 -> <instruction>`
//!                `when.channel=telegram -> <instruction>`

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use mimi_bus::{BusMessage, Channel, MediaType};

use crate::prompt::{SKILLS_FILE, TOOLS_FILE};

const SKILL_RULE_MAX: usize = 12;
const SKILL_HINT_MAX_SELECTED: usize = 4;
const SKILL_RULE_DEFAULT_PRIO_MEDIA: i32 = 70;
const SKILL_RULE_DEFAULT_PRIO_CHANNEL: i32 = 60;

const VOLUME_ADJUST_KEYWORDS: &[&str] = &[
    "调", "调整", "设置", "设为", "改成", "改到", "变成", "增大", "增加", "调大", "大一点",
    "开大", "减小", "减少", "调小", "小一点", "开小", "降低", "静音", "mute", "unmute", "%",
];
const VOLUME_QUERY_KEYWORDS: &[&str] = &[
    "多少", "几", "多大", "当前", "现在", "查询", "查看", "是多少", "是什么", "啥", "吗", "？", "?",
];

const RUNTIME_HINT_VOLUME_QUERY: &str = "这是音量查询问题。必须先调用 get_volume 获取实时音量，再回答用户。禁止凭上下文记忆直接给出音量数值。";
const RUNTIME_HINT_VOLUME_ADJUST: &str = "这是音量调节问题。必须调用 set_volume 执行调整；如果用户说“增大/减小X%”这类相对变化，先调用 get_volume，再计算后调用 set_volume。";

#[derive(Debug, Clone)]
struct RouteHints {
    text: String,
    system: String,
    voice: String,
    photo: String,
    document: String,
    media: String,
}

impl Default for RouteHints {
    fn default() -> Self {
        Self {
            text: String::new(),
            system: "这是系统触发任务，直接执行任务并给出结果，不要寒暄。".to_string(),
            voice: "这是语音转写输入，优先用简短自然中文回复；信息缺失时先提一个澄清问题。"
                .to_string(),
            photo: "这是图片解析输入，优先基于描述/文字/元素回答；不要复述原始元数据。"
                .to_string(),
            document: "这是文件输入，先提炼关键信息与结论；不确定处明确说明。".to_string(),
            media: "这是媒体摘要输入，先基于现有信息回答，并说明可继续补充解析。".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct SkillRule {
    on_media_type: bool,
    trigger_value: String,
    instruction: String,
    priority: i32,
    order: usize,
}

struct Cached<T> {
    value: T,
    loaded_at: Option<Instant>,
}

pub struct HintEngine {
    config_dir: PathBuf,
    route_ttl: Duration,
    skill_ttl: Duration,
    route: Mutex<Cached<RouteHints>>,
    skills: Mutex<Cached<Vec<SkillRule>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeIntent {
    None,
    Query,
    Adjust,
}

impl HintEngine {
    pub fn new(config_dir: PathBuf, route_ttl_ms: u64, skill_ttl_ms: u64) -> Self {
        Self {
            config_dir,
            route_ttl: Duration::from_millis(route_ttl_ms),
            skill_ttl: Duration::from_millis(skill_ttl_ms),
            route: Mutex::new(Cached {
                value: RouteHints::default(),
                loaded_at: None,
            }),
            skills: Mutex::new(Cached {
                value: Vec::new(),
                loaded_at: None,
            }),
        }
    }

    /// Compose the text fed to the LLM for this message. Returns the raw
    /// content unchanged when no hint or metadata applies.
    pub fn compose_user_content(&self, msg: &BusMessage) -> String {
        let route_hint = self.route_hint_for(msg);
        let runtime_hint = match detect_voice_volume_intent(msg) {
            VolumeIntent::Query => RUNTIME_HINT_VOLUME_QUERY,
            VolumeIntent::Adjust => RUNTIME_HINT_VOLUME_ADJUST,
            VolumeIntent::None => "",
        };
        let skill_hints = self.collect_skill_hints(msg);
        let has_meta = msg.media_type != MediaType::Text
            || msg.file_id.is_some()
            || msg.file_path.is_some()
            || msg.meta_json.as_deref().is_some_and(|m| !m.is_empty());

        if route_hint.is_empty() && runtime_hint.is_empty() && skill_hints.is_empty() && !has_meta {
            return msg.content.clone();
        }
        if !skill_hints.is_empty() {
            info!(
                matched = skill_hints.len(),
                channel = %msg.channel,
                media_type = %msg.media_type,
                "skill hints matched"
            );
        }

        let mut out = msg.content.clone();
        if !route_hint.is_empty() {
            out.push_str(&format!("\n\n[route_hint]\n{route_hint}"));
        }
        if !runtime_hint.is_empty() {
            out.push_str(&format!("\n\n[route_hint_runtime]\n{runtime_hint}"));
        }
        if !skill_hints.is_empty() {
            out.push_str("\n\n[skill_hints]\n");
            for hint in &skill_hints {
                out.push_str(&format!("- {hint}\n"));
            }
        }
        if has_meta {
            out.push_str(&format!(
                "\n\n[message_meta]\nchannel={}\nmedia_type={}\nfile_id={}\nfile_path={}\nmeta={}",
                msg.channel,
                msg.media_type,
                msg.file_id.as_deref().unwrap_or("-"),
                msg.file_path.as_deref().unwrap_or("-"),
                msg.meta_json.as_deref().unwrap_or("{}"),
            ));
        }
        out
    }

    fn route_hint_for(&self, msg: &BusMessage) -> String {
        let mut cached = self.route.lock().unwrap();
        if cached
            .loaded_at
            .map(|t| t.elapsed() >= self.route_ttl)
            .unwrap_or(true)
        {
            cached.value = self.load_route_hints();
            cached.loaded_at = Some(Instant::now());
        }

        let hints = &cached.value;
        if msg.channel == Channel::System || msg.media_type == MediaType::System {
            return hints.system.clone();
        }
        match msg.media_type {
            MediaType::Voice => hints.voice.clone(),
            MediaType::Photo => hints.photo.clone(),
            MediaType::Document => hints.document.clone(),
            MediaType::Media => hints.media.clone(),
            _ => hints.text.clone(),
        }
    }

    fn load_route_hints(&self) -> RouteHints {
        let mut hints = RouteHints::default();
        let Ok(raw) = std::fs::read_to_string(self.config_dir.join(TOOLS_FILE)) else {
            debug!("route hint config not found, using defaults");
            return hints;
        };
        for line in raw.lines() {
            apply_route_line(&mut hints, line);
        }
        hints
    }

    fn collect_skill_hints(&self, msg: &BusMessage) -> Vec<String> {
        let mut cached = self.skills.lock().unwrap();
        if cached
            .loaded_at
            .map(|t| t.elapsed() >= self.skill_ttl)
            .unwrap_or(true)
        {
            cached.value = self.load_skill_rules();
            cached.loaded_at = Some(Instant::now());
        }

        // Dedup by instruction keeping the best (priority, then file order).
        let mut matched: Vec<(String, i32, usize)> = Vec::new();
        for rule in &cached.value {
            let ok = if rule.on_media_type {
                msg.media_type.as_str() == rule.trigger_value
            } else {
                msg.channel.as_str() == rule.trigger_value
            };
            if !ok {
                continue;
            }
            if let Some(existing) = matched.iter_mut().find(|(i, _, _)| *i == rule.instruction) {
                if rule.priority > existing.1
                    || (rule.priority == existing.1 && rule.order < existing.2)
                {
                    existing.1 = rule.priority;
                    existing.2 = rule.order;
                }
                continue;
            }
            matched.push((rule.instruction.clone(), rule.priority, rule.order));
        }

        matched.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        matched
            .into_iter()
            .take(SKILL_HINT_MAX_SELECTED)
            .map(|(i, _, _)| i)
            .collect()
    }

    fn load_skill_rules(&self) -> Vec<SkillRule> {
        let Ok(raw) = std::fs::read_to_string(self.config_dir.join(SKILLS_FILE)) else {
            debug!("skill rule config not found");
            return Vec::new();
        };
        let mut rules = Vec::new();
        for line in raw.lines() {
            if rules.len() >= SKILL_RULE_MAX {
                break;
            }
            if let Some(rule) = parse_skill_line(line, rules.len()) {
                rules.push(rule);
            }
        }
        rules
    }
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    line.strip_prefix(['-', '*'])
        .map(str::trim_start)
        .unwrap_or(line)
}

fn apply_route_line(hints: &mut RouteHints, line: &str) {
    let line = strip_bullet(line);
    let Some(rest) = line.strip_prefix("route.") else {
        return;
    };
    let Some((key, value)) = rest.split_once(':') else {
        return;
    };
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    let slot = match key.trim() {
        "text" => &mut hints.text,
        "system" => &mut hints.system,
        "voice" => &mut hints.voice,
        "photo" => &mut hints.photo,
        "document" => &mut hints.document,
        "media" => &mut hints.media,
        _ => return,
    };
    *slot = value.to_string();
}

fn parse_skill_line(line: &str, order: usize) -> Option<SkillRule> {
    let line = strip_bullet(line);
    let rest = line.strip_prefix("when.")?;
    let (lhs, rhs) = rest.split_once("->")?;
    let instruction = rhs.trim();
    if instruction.is_empty() {
        return None;
    }

    let mut on_media_type = None;
    let mut trigger_value = None;
    let mut priority: Option<i32> = None;

    for token in lhs.split(',') {
        let Some((k, v)) = token.split_once('=') else {
            continue;
        };
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            continue;
        }
        match k {
            "media_type" if trigger_value.is_none() => {
                on_media_type = Some(true);
                trigger_value = Some(v.to_string());
            }
            "channel" if trigger_value.is_none() => {
                on_media_type = Some(false);
                trigger_value = Some(v.to_string());
            }
            "priority" => {
                if let Ok(p) = v.parse::<i32>() {
                    priority = Some(p);
                }
            }
            _ => {}
        }
    }

    let on_media_type = on_media_type?;
    let priority = priority
        .unwrap_or(if on_media_type {
            SKILL_RULE_DEFAULT_PRIO_MEDIA
        } else {
            SKILL_RULE_DEFAULT_PRIO_CHANNEL
        })
        .clamp(0, 100);

    Some(SkillRule {
        on_media_type,
        trigger_value: trigger_value?,
        instruction: instruction.to_string(),
        priority,
        order,
    })
}

fn detect_voice_volume_intent(msg: &BusMessage) -> VolumeIntent {
    if msg.media_type != MediaType::Voice || !msg.content.contains("音量") {
        return VolumeIntent::None;
    }
    if VOLUME_ADJUST_KEYWORDS.iter().any(|k| msg.content.contains(k)) {
        return VolumeIntent::Adjust;
    }
    if VOLUME_QUERY_KEYWORDS.iter().any(|k| msg.content.contains(k)) {
        return VolumeIntent::Query;
    }
    // No clear keyword: treat as a query so the model reads the real value
    // instead of guessing one.
    VolumeIntent::Query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &std::path::Path) -> HintEngine {
        HintEngine::new(dir.to_path_buf(), 60_000, 60_000)
    }

    fn msg(channel: Channel, media: MediaType, content: &str) -> BusMessage {
        BusMessage {
            channel,
            chat_id: "c".to_string(),
            media_type: media,
            file_id: None,
            file_path: None,
            content: content.to_string(),
            meta_json: None,
        }
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let m = msg(Channel::Telegram, MediaType::Text, "今天几号？");
        assert_eq!(engine.compose_user_content(&m), "今天几号？");
    }

    #[test]
    fn voice_volume_query_gets_runtime_hint() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let m = msg(Channel::Voice, MediaType::Voice, "音量如何");
        let composed = engine.compose_user_content(&m);
        assert!(composed.starts_with("音量如何"));
        assert!(composed.contains("[route_hint]"));
        assert!(composed.contains("[route_hint_runtime]"));
        assert!(composed.contains("get_volume"));
        assert!(composed.contains("[message_meta]"));
    }

    #[test]
    fn route_overrides_are_loaded_from_tools_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TOOLS_FILE),
            "- route.photo: describe the picture briefly\nroute.unknown: ignored\n",
        )
        .unwrap();
        let engine = engine(dir.path());
        let m = msg(Channel::Telegram, MediaType::Photo, "看看这张图");
        let composed = engine.compose_user_content(&m);
        assert!(composed.contains("describe the picture briefly"));
    }

    #[test]
    fn skill_rules_select_by_priority_then_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SKILLS_FILE),
            "when.media_type=voice,priority=90 -> speak slowly\n\
             when.channel=voice -> low priority channel hint\n\
             when.media_type=voice,priority=90 -> speak slowly\n\
             when.media_type=voice -> default media hint\n",
        )
        .unwrap();
        let engine = engine(dir.path());
        let m = msg(Channel::Voice, MediaType::Voice, "讲个笑话");
        let composed = engine.compose_user_content(&m);

        let hints: Vec<&str> = composed
            .lines()
            .skip_while(|l| *l != "[skill_hints]")
            .skip(1)
            .take_while(|l| l.starts_with("- "))
            .collect();
        assert_eq!(
            hints,
            vec![
                "- speak slowly",
                "- default media hint",
                "- low priority channel hint"
            ]
        );
    }

    #[test]
    fn skill_hint_selection_caps_at_four() {
        let dir = tempfile::tempdir().unwrap();
        let rules: String = (0..6)
            .map(|i| format!("when.channel=telegram,priority={} -> hint {i}\n", 50 + i))
            .collect();
        std::fs::write(dir.path().join(SKILLS_FILE), rules).unwrap();
        let engine = engine(dir.path());
        let m = msg(Channel::Telegram, MediaType::Text, "hello");
        let composed = engine.compose_user_content(&m);
        let count = composed.lines().filter(|l| l.starts_with("- hint")).count();
        assert_eq!(count, 4);
        // Highest priorities win.
        assert!(composed.contains("- hint 5"));
        assert!(!composed.contains("- hint 0"));
    }

    #[test]
    fn photo_without_rules_still_carries_meta() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut m = msg(Channel::Telegram, MediaType::Photo, "图里有什么");
        m.file_id = Some("file-123".to_string());
        let composed = engine.compose_user_content(&m);
        assert!(composed.contains("media_type=photo"));
        assert!(composed.contains("file_id=file-123"));
        assert!(composed.contains("file_path=-"));
    }
}
