//! The control plane proper: idempotency cache, alarm and temperature-rule
//! pools, audit ring, and capability execution.
//!
//! All shared state sits behind one short mutex. Readers copy out under the
//! lock; timer callbacks re-take the lock, read-and-invalidate their slot,
//! and only then enqueue, so a concurrent `alarm_clear` can never race a
//! fire into a double delivery.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::AbortHandle;
use tracing::{info, warn};

use mimi_bus::{BusMessage, Channel, MediaType, MessageBus};
use mimi_core::config::ControlConfig;
use mimi_core::device::{HostControl, VoiceBackend, VolumeSink};

use crate::capability;
use crate::error::{ControlError, Result};
use crate::parser::{self, Parsed};
use crate::types::{
    AlarmInfo, AuditEntry, CommandKind, ControlCommand, ControlResult, TempAction, TempRuleInfo,
};

pub struct ControlPlane {
    cfg: ControlConfig,
    bus: Arc<MessageBus>,
    volume: Arc<dyn VolumeSink>,
    voice: Arc<dyn VoiceBackend>,
    host: Arc<dyn HostControl>,
    state: Arc<Mutex<PlaneState>>,
}

struct PlaneState {
    idemp: Vec<IdempEntry>,
    alarms: Vec<AlarmSlot>,
    temp_rules: Vec<TempRuleSlot>,
    audits: VecDeque<AuditEntry>,
    next_alarm_id: u32,
    next_rule_id: u32,
    reboot_timer: Option<AbortHandle>,
}

struct IdempEntry {
    request_id: String,
    ts_ms: i64,
    result: ControlResult,
}

#[derive(Default)]
struct AlarmSlot {
    active: bool,
    alarm_id: u32,
    due_ms: i64,
    timer: Option<AbortHandle>,
    channel: Option<Channel>,
    chat_id: String,
    note: String,
}

impl AlarmSlot {
    fn clear(&mut self) {
        *self = AlarmSlot::default();
    }
}

#[derive(Default)]
struct TempRuleSlot {
    active: bool,
    rule_id: u32,
    threshold_x10: i32,
    comparator: Option<crate::types::Comparator>,
    action: Option<TempAction>,
    last_trigger_ms: i64,
}

impl TempRuleSlot {
    fn clear(&mut self) {
        *self = TempRuleSlot::default();
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl ControlPlane {
    pub fn new(
        cfg: ControlConfig,
        bus: Arc<MessageBus>,
        volume: Arc<dyn VolumeSink>,
        voice: Arc<dyn VoiceBackend>,
        host: Arc<dyn HostControl>,
    ) -> Self {
        let state = PlaneState {
            idemp: Vec::with_capacity(cfg.idemp_cache_size),
            alarms: (0..cfg.max_alarms).map(|_| AlarmSlot::default()).collect(),
            temp_rules: (0..cfg.max_temp_rules)
                .map(|_| TempRuleSlot::default())
                .collect(),
            audits: VecDeque::with_capacity(cfg.audit_size),
            next_alarm_id: 1,
            next_rule_id: 1,
            reboot_timer: None,
        };
        info!(
            alarms = cfg.max_alarms,
            temp_rules = cfg.max_temp_rules,
            "control plane initialized"
        );
        Self {
            cfg,
            bus,
            volume,
            voice,
            host,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Rule-first entry point. `handled == false` means the message is not
    /// a control command and the caller must run the LLM flow instead.
    pub async fn try_handle_message(&self, msg: &BusMessage) -> ControlResult {
        let mut out = ControlResult::default();
        if msg.media_type != MediaType::Voice {
            return out;
        }
        let Some(parsed) = parser::parse_message(msg, self.volume.get()) else {
            return out;
        };

        out.handled = true;
        out.from_rule = true;

        let cmd = match parsed {
            Parsed::NeedsClarification {
                capability,
                request_id,
                reason,
                ..
            } => {
                out.request_id = request_id;
                out.capability = capability.to_string();
                if let Some(cached) = self.idemp_lookup(&out.request_id) {
                    info!(request_id = %cached.request_id, "idempotency hit");
                    self.append_audit(&cached, "幂等命中，返回缓存结果");
                    return cached;
                }
                out.success = false;
                out.response_text = reason.clone();
                self.idemp_store(&out);
                self.append_audit(&out, &reason);
                return out;
            }
            Parsed::Command(cmd) => {
                out.request_id = cmd.request_id.clone();
                cmd
            }
        };

        if let Some(cached) = self.idemp_lookup(&out.request_id) {
            info!(
                request_id = %cached.request_id,
                capability = %cached.capability,
                "idempotency hit"
            );
            self.append_audit(&cached, "幂等命中，返回缓存结果");
            return cached;
        }

        match self.execute_with_capability(&cmd, &mut out).await {
            Ok(()) => {
                out.success = true;
                self.idemp_store(&out);
                let summary = out.response_text.clone();
                self.append_audit(&out, &summary);
                info!(
                    request_id = %out.request_id,
                    capability = %out.capability,
                    "rule command handled"
                );
            }
            Err(e) => {
                out.success = false;
                out.response_text = format!("操作失败：{e}。");
                self.idemp_store(&out);
                let summary = out.response_text.clone();
                self.append_audit(&out, &summary);
                warn!(
                    request_id = %out.request_id,
                    capability = %out.capability,
                    error = %e,
                    "rule command failed"
                );
            }
        }
        out
    }

    /// Temperature event entry (`temp_x10`: °C × 10, e.g. 305 = 30.5°C).
    ///
    /// Matching rules past their cool-down are collected and stamped under
    /// the lock; the actions run outside it. One failing action never stops
    /// the rest.
    pub async fn handle_temperature_event(&self, temp_x10: i32) {
        let now = now_ms();
        let cooldown = self.cfg.temp_rule_cooldown_ms as i64;

        let hits: Vec<(u32, TempAction)> = {
            let mut st = self.state.lock().unwrap();
            st.temp_rules
                .iter_mut()
                .filter(|r| r.active && now - r.last_trigger_ms >= cooldown)
                .filter(|r| {
                    r.comparator
                        .map(|c| c.matches(temp_x10, r.threshold_x10))
                        .unwrap_or(false)
                })
                .filter_map(|r| {
                    r.last_trigger_ms = now;
                    r.action.clone().map(|a| (r.rule_id, a))
                })
                .collect()
        };

        for (rule_id, action) in hits {
            match action {
                TempAction::SetVolume { level } => {
                    let cmd = ControlCommand {
                        kind: CommandKind::SetVolume {
                            target: i64::from(level),
                            relative: false,
                            delta: 0,
                        },
                        request_id: format!("temp-{rule_id}-{now}"),
                        channel: Channel::System,
                        chat_id: "temp_rule".to_string(),
                    };
                    let mut result = ControlResult {
                        handled: true,
                        from_rule: true,
                        request_id: cmd.request_id.clone(),
                        ..ControlResult::default()
                    };
                    match self.execute_with_capability(&cmd, &mut result).await {
                        Ok(()) => {
                            result.success = true;
                            self.append_audit(&result, "温度规则触发：执行音量调整");
                            info!(rule_id, temp_x10, level, "temp rule hit: set_volume");
                        }
                        Err(e) => {
                            result.success = false;
                            result.response_text = format!("温度规则执行失败：{e}");
                            let summary = result.response_text.clone();
                            self.append_audit(&result, &summary);
                            warn!(rule_id, error = %e, "temp rule execute failed");
                        }
                    }
                }
                TempAction::Remind { note } => {
                    let mut result = ControlResult {
                        handled: true,
                        from_rule: true,
                        capability: "temp_rule_notify".to_string(),
                        request_id: format!("temp-{rule_id}-{now}-n"),
                        ..ControlResult::default()
                    };
                    let note = if note.is_empty() {
                        "请注意温度变化。".to_string()
                    } else {
                        note
                    };
                    let msg = BusMessage {
                        channel: Channel::System,
                        chat_id: "temp_rule".to_string(),
                        media_type: MediaType::Text,
                        file_id: None,
                        file_path: None,
                        content: format!(
                            "温度触发提醒：当前{}.{}°C，{}",
                            temp_x10 / 10,
                            (temp_x10 % 10).abs(),
                            note
                        ),
                        meta_json: None,
                    };
                    if self.bus.push_outbound(msg).await.is_err() {
                        warn!(rule_id, "temp rule outbound enqueue failed");
                        result.success = false;
                        result.response_text = "温度规则提醒入队失败".to_string();
                    } else {
                        info!(rule_id, temp_x10, "temp rule hit: remind");
                        result.success = true;
                        result.response_text = "温度规则触发：执行提醒".to_string();
                    }
                    let summary = result.response_text.clone();
                    self.append_audit(&result, &summary);
                }
            }
        }
    }

    /// The N most recent audit entries, newest first.
    pub fn recent_audits(&self, max: usize) -> Vec<AuditEntry> {
        let st = self.state.lock().unwrap();
        st.audits.iter().rev().take(max).cloned().collect()
    }

    /// Active alarms in slot order.
    pub fn active_alarms(&self) -> Vec<AlarmInfo> {
        let now = now_ms();
        let st = self.state.lock().unwrap();
        st.alarms
            .iter()
            .filter(|s| s.active)
            .map(|s| AlarmInfo {
                alarm_id: s.alarm_id,
                remaining_ms: (s.due_ms - now).max(0) as u64,
                channel: s.channel.unwrap_or(Channel::System),
                chat_id: s.chat_id.clone(),
                note: s.note.clone(),
            })
            .collect()
    }

    /// Active temperature rules in slot order.
    pub fn temperature_rules(&self) -> Vec<TempRuleInfo> {
        let st = self.state.lock().unwrap();
        st.temp_rules
            .iter()
            .filter(|r| r.active)
            .filter_map(|r| {
                Some(TempRuleInfo {
                    rule_id: r.rule_id,
                    threshold_x10: r.threshold_x10,
                    comparator: r.comparator?,
                    action: r.action.clone()?,
                })
            })
            .collect()
    }

    // --- capability execution -------------------------------------------

    async fn execute_with_capability(
        &self,
        cmd: &ControlCommand,
        out: &mut ControlResult,
    ) -> Result<()> {
        let spec = capability::spec_for(&cmd.kind);
        out.capability = spec.name.to_string();
        capability::validate(&cmd.kind)?;

        let mut last_err = ControlError::Timeout;
        for _ in 0..=spec.retry_max {
            let attempt = tokio::time::timeout(
                Duration::from_millis(spec.timeout_ms),
                self.execute(cmd, out),
            )
            .await;
            match attempt {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = ControlError::Timeout,
            }
        }
        Err(last_err)
    }

    async fn execute(&self, cmd: &ControlCommand, out: &mut ControlResult) -> Result<()> {
        match &cmd.kind {
            CommandKind::GetVolume => {
                let v = i64::from(self.volume.get());
                out.before_value = v;
                out.after_value = v;
                out.response_text = format!("当前音量是百分之{v}。");
                Ok(())
            }
            CommandKind::SetVolume {
                target,
                relative,
                delta,
            } => {
                out.before_value = i64::from(self.volume.get());
                self.volume.set((*target).clamp(0, 100) as u8);
                out.after_value = i64::from(self.volume.get());
                if out.after_value != *target {
                    return Err(ControlError::Device(format!(
                        "写入后回读不一致: expect={} actual={}",
                        target, out.after_value
                    )));
                }
                if *relative {
                    let verb = if *delta >= 0 { "增大" } else { "减小" };
                    out.response_text = format!(
                        "已将音量{}百分之{}，当前为百分之{}。",
                        verb,
                        delta.abs(),
                        out.after_value
                    );
                } else {
                    out.response_text = format!("音量已设置为百分之{}。", out.after_value);
                }
                Ok(())
            }
            CommandKind::Reboot { delay_ms } => self.execute_reboot(*delay_ms, out),
            CommandKind::AlarmCreate { delay_ms, note } => {
                self.execute_alarm_create(cmd, *delay_ms, note, out)
            }
            CommandKind::AlarmList => {
                out.response_text = self.format_alarm_list();
                Ok(())
            }
            CommandKind::AlarmClear { alarm_id } => self.execute_alarm_clear(*alarm_id, out),
            CommandKind::TempRuleCreate {
                threshold_x10,
                comparator,
                action,
            } => self.execute_temp_rule_create(*threshold_x10, *comparator, action, out),
            CommandKind::TempRuleList => {
                out.response_text = self.format_temp_rule_list();
                Ok(())
            }
            CommandKind::TempRuleClear { rule_id } => self.execute_temp_rule_clear(*rule_id, out),
            CommandKind::PlayMusic { query } => {
                self.voice
                    .play_music(query)
                    .await
                    .map_err(|e| ControlError::Device(format!("播放音乐失败: {e}")))?;
                out.pending_action = true;
                // Silent on success so playback is not interrupted.
                out.response_text.clear();
                Ok(())
            }
            CommandKind::StopMusic => {
                self.voice
                    .stop_music()
                    .await
                    .map_err(|e| ControlError::Device(format!("停止音乐失败: {e}")))?;
                out.response_text = "已停止音乐播放。".to_string();
                Ok(())
            }
        }
    }

    fn execute_reboot(&self, delay_ms: u64, out: &mut ControlResult) -> Result<()> {
        if let Some(prev) = self.state.lock().unwrap().reboot_timer.take() {
            prev.abort();
        }

        let host = Arc::clone(&self.host);
        let delay = Duration::from_millis(delay_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            warn!("reboot timer fired");
            host.restart();
        })
        .abort_handle();
        self.state.lock().unwrap().reboot_timer = Some(handle);

        out.pending_action = true;
        out.response_text = format!("设备将在{:.1}秒后重启。", delay_ms as f64 / 1000.0);
        Ok(())
    }

    fn execute_alarm_create(
        &self,
        cmd: &ControlCommand,
        delay_ms: u64,
        note: &str,
        out: &mut ControlResult,
    ) -> Result<()> {
        let alarm_id = {
            let mut st = self.state.lock().unwrap();
            let id = st.next_alarm_id;
            st.next_alarm_id = st.next_alarm_id.checked_add(1).unwrap_or(1);
            id
        };

        let state = Arc::clone(&self.state);
        let bus = Arc::clone(&self.bus);
        let delay = Duration::from_millis(delay_ms);
        let handle = tokio::spawn(alarm_fire(state, bus, alarm_id, delay)).abort_handle();

        {
            let mut st = self.state.lock().unwrap();
            let Some(slot) = st.alarms.iter_mut().find(|s| !s.active) else {
                drop(st);
                handle.abort();
                return Err(ControlError::CapacityExhausted(format!(
                    "闹钟已满，最多{}个",
                    self.cfg.max_alarms
                )));
            };
            slot.active = true;
            slot.alarm_id = alarm_id;
            slot.due_ms = now_ms() + delay_ms as i64;
            slot.timer = Some(handle);
            slot.channel = Some(cmd.channel);
            slot.chat_id = cmd.chat_id.clone();
            slot.note = note.to_string();
        }

        out.pending_action = true;
        out.response_text = format!(
            "已创建闹钟#{alarm_id}，{:.1}秒后提醒你。",
            delay_ms as f64 / 1000.0
        );
        Ok(())
    }

    fn format_alarm_list(&self) -> String {
        let infos = self.active_alarms();
        if infos.is_empty() {
            return "当前没有活动闹钟。".to_string();
        }
        let items: Vec<String> = infos
            .iter()
            .map(|a| format!("#{}({}s)", a.alarm_id, a.remaining_ms.div_ceil(1000)))
            .collect();
        format!("当前有{}个闹钟：{}", infos.len(), items.join(" "))
    }

    fn execute_alarm_clear(&self, target: Option<u32>, out: &mut ControlResult) -> Result<()> {
        let mut handles = Vec::new();
        let cleared = {
            let mut st = self.state.lock().unwrap();
            let mut cleared = 0usize;
            for slot in st.alarms.iter_mut() {
                if !slot.active {
                    continue;
                }
                if let Some(id) = target {
                    if slot.alarm_id != id {
                        continue;
                    }
                }
                if let Some(h) = slot.timer.take() {
                    handles.push(h);
                }
                slot.clear();
                cleared += 1;
                if target.is_some() {
                    break;
                }
            }
            cleared
        };
        for h in handles {
            h.abort();
        }

        match (target, cleared) {
            (Some(id), 0) => Err(ControlError::NotFound(format!("未找到闹钟#{id}"))),
            (None, 0) => {
                out.response_text = "当前没有活动闹钟。".to_string();
                Ok(())
            }
            (Some(id), _) => {
                out.response_text = format!("已取消闹钟#{id}。");
                Ok(())
            }
            (None, n) => {
                out.response_text = format!("已取消全部闹钟（{n}个）。");
                Ok(())
            }
        }
    }

    fn execute_temp_rule_create(
        &self,
        threshold_x10: i32,
        comparator: crate::types::Comparator,
        action: &TempAction,
        out: &mut ControlResult,
    ) -> Result<()> {
        let rule_id = {
            let mut st = self.state.lock().unwrap();
            let Some(slot_idx) = st.temp_rules.iter().position(|r| !r.active) else {
                return Err(ControlError::CapacityExhausted(format!(
                    "温度规则已满，最多{}条",
                    self.cfg.max_temp_rules
                )));
            };
            let id = st.next_rule_id;
            st.next_rule_id = st.next_rule_id.checked_add(1).unwrap_or(1);
            let slot = &mut st.temp_rules[slot_idx];
            slot.active = true;
            slot.rule_id = id;
            slot.threshold_x10 = threshold_x10;
            slot.comparator = Some(comparator);
            slot.action = Some(action.clone());
            slot.last_trigger_ms = 0;
            id
        };

        let cmp = comparator.symbol();
        let whole = threshold_x10 / 10;
        let frac = (threshold_x10 % 10).abs();
        out.response_text = match action {
            TempAction::SetVolume { level } => format!(
                "已创建温度规则#{rule_id}：温度{cmp}{whole}.{frac}°C时，音量设为{level}%。"
            ),
            TempAction::Remind { note } => format!(
                "已创建温度规则#{rule_id}：温度{cmp}{whole}.{frac}°C时提醒“{note}”。"
            ),
        };
        Ok(())
    }

    fn format_temp_rule_list(&self) -> String {
        let rules = self.temperature_rules();
        if rules.is_empty() {
            return "当前没有温度规则。".to_string();
        }
        let items: Vec<String> = rules
            .iter()
            .map(|r| {
                let cmp = r.comparator.symbol();
                let whole = r.threshold_x10 / 10;
                let frac = (r.threshold_x10 % 10).abs();
                match &r.action {
                    TempAction::SetVolume { level } => {
                        format!("#{}({}{}.{}°C->{}%)", r.rule_id, cmp, whole, frac, level)
                    }
                    TempAction::Remind { .. } => {
                        format!("#{}({}{}.{}°C->提醒)", r.rule_id, cmp, whole, frac)
                    }
                }
            })
            .collect();
        format!("当前有{}条温度规则：{}", rules.len(), items.join(" "))
    }

    fn execute_temp_rule_clear(&self, target: Option<u32>, out: &mut ControlResult) -> Result<()> {
        let cleared = {
            let mut st = self.state.lock().unwrap();
            let mut cleared = 0usize;
            for slot in st.temp_rules.iter_mut() {
                if !slot.active {
                    continue;
                }
                if let Some(id) = target {
                    if slot.rule_id != id {
                        continue;
                    }
                }
                slot.clear();
                cleared += 1;
                if target.is_some() {
                    break;
                }
            }
            cleared
        };

        match (target, cleared) {
            (Some(id), 0) => Err(ControlError::NotFound(format!("未找到温度规则#{id}"))),
            (None, 0) => {
                out.response_text = "当前没有温度规则。".to_string();
                Ok(())
            }
            (Some(id), _) => {
                out.response_text = format!("已删除温度规则#{id}。");
                Ok(())
            }
            (None, n) => {
                out.response_text = format!("已清空温度规则（{n}条）。");
                Ok(())
            }
        }
    }

    // --- idempotency + audit --------------------------------------------

    fn idemp_lookup(&self, request_id: &str) -> Option<ControlResult> {
        if request_id.is_empty() {
            return None;
        }
        let now = now_ms();
        let window = self.cfg.idemp_window_ms as i64;
        let st = self.state.lock().unwrap();
        st.idemp
            .iter()
            .find(|e| e.request_id == request_id && now - e.ts_ms <= window)
            .map(|e| {
                let mut result = e.result.clone();
                result.dedup_hit = true;
                result
            })
    }

    fn idemp_store(&self, result: &ControlResult) {
        if result.request_id.is_empty() {
            return;
        }
        let entry = IdempEntry {
            request_id: result.request_id.clone(),
            ts_ms: now_ms(),
            result: result.clone(),
        };
        let mut st = self.state.lock().unwrap();
        if st.idemp.len() < self.cfg.idemp_cache_size {
            st.idemp.push(entry);
            return;
        }
        // Evict the least-recent entry.
        if let Some(oldest) = st
            .idemp
            .iter_mut()
            .min_by_key(|e| e.ts_ms)
        {
            *oldest = entry;
        }
    }

    fn append_audit(&self, result: &ControlResult, summary: &str) {
        let entry = AuditEntry {
            ts_ms: now_ms(),
            request_id: result.request_id.clone(),
            capability: result.capability.clone(),
            success: result.success,
            dedup_hit: result.dedup_hit,
            summary: if summary.is_empty() {
                format!(
                    "handled={} success={}",
                    u8::from(result.handled),
                    u8::from(result.success)
                )
            } else {
                summary.to_string()
            },
        };
        let mut st = self.state.lock().unwrap();
        if st.audits.len() == self.cfg.audit_size {
            st.audits.pop_front();
        }
        st.audits.push_back(entry);
    }
}

/// Body of an alarm timer task. The slot lookup happens by id under the
/// lock, so a cleared or reused slot means no delivery.
async fn alarm_fire(
    state: Arc<Mutex<PlaneState>>,
    bus: Arc<MessageBus>,
    alarm_id: u32,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let fired = {
        let mut st = state.lock().unwrap();
        st.alarms
            .iter_mut()
            .find(|s| s.active && s.alarm_id == alarm_id)
            .map(|slot| {
                let channel = slot.channel.unwrap_or(Channel::System);
                let chat_id = std::mem::take(&mut slot.chat_id);
                let note = std::mem::take(&mut slot.note);
                slot.clear();
                (channel, chat_id, note)
            })
    };
    let Some((channel, chat_id, note)) = fired else {
        return;
    };

    let msg = BusMessage {
        channel,
        chat_id: if chat_id.is_empty() {
            "alarm".to_string()
        } else {
            chat_id
        },
        media_type: MediaType::Text,
        file_id: None,
        file_path: None,
        content: format!(
            "闹钟提醒：{}",
            if note.is_empty() { "时间到了。" } else { note.as_str() }
        ),
        meta_json: None,
    };

    if bus.push_outbound(msg).await.is_err() {
        warn!(alarm_id, "alarm outbound enqueue failed");
    } else {
        info!(alarm_id, "alarm fired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mimi_core::config::BusConfig;
    use mimi_core::device::SoftVolume;

    struct CountingVolume {
        inner: SoftVolume,
        sets: AtomicUsize,
    }

    impl CountingVolume {
        fn new(initial: u8) -> Self {
            Self {
                inner: SoftVolume::new(initial),
                sets: AtomicUsize::new(0),
            }
        }

        fn set_count(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }
    }

    impl VolumeSink for CountingVolume {
        fn set(&self, level: u8) {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(level);
        }

        fn get(&self) -> u8 {
            self.inner.get()
        }
    }

    #[derive(Default)]
    struct FakeVoice {
        plays: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VoiceBackend for FakeVoice {
        async fn speak(&self, _text: &str) -> mimi_core::Result<()> {
            Ok(())
        }

        async fn play_music(&self, _query: &str) -> mimi_core::Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_music(&self) -> mimi_core::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeHost {
        restarts: AtomicUsize,
    }

    impl HostControl for FakeHost {
        fn restart(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        plane: ControlPlane,
        bus: Arc<MessageBus>,
        volume: Arc<CountingVolume>,
        voice: Arc<FakeVoice>,
        host: Arc<FakeHost>,
    }

    fn fixture_with(cfg: ControlConfig, initial_volume: u8) -> Fixture {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let volume = Arc::new(CountingVolume::new(initial_volume));
        let voice = Arc::new(FakeVoice::default());
        let host = Arc::new(FakeHost::default());
        let plane = ControlPlane::new(
            cfg,
            Arc::clone(&bus),
            Arc::clone(&volume) as Arc<dyn VolumeSink>,
            Arc::clone(&voice) as Arc<dyn VoiceBackend>,
            Arc::clone(&host) as Arc<dyn HostControl>,
        );
        Fixture {
            plane,
            bus,
            volume,
            voice,
            host,
        }
    }

    fn fixture(initial_volume: u8) -> Fixture {
        fixture_with(ControlConfig::default(), initial_volume)
    }

    fn voice_msg(content: &str) -> BusMessage {
        BusMessage {
            channel: Channel::Voice,
            chat_id: "voice".to_string(),
            media_type: MediaType::Voice,
            file_id: None,
            file_path: None,
            content: content.to_string(),
            meta_json: None,
        }
    }

    #[tokio::test]
    async fn non_voice_media_is_never_handled() {
        let fx = fixture(30);
        let mut msg = voice_msg("现在音量是多少？");
        msg.media_type = MediaType::Text;
        let result = fx.plane.try_handle_message(&msg).await;
        assert!(!result.handled);
    }

    #[tokio::test]
    async fn volume_query_fast_path() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("现在音量是多少？")).await;
        assert!(result.handled);
        assert!(result.success);
        assert!(!result.dedup_hit);
        assert_eq!(result.capability, "get_volume");
        assert_eq!(result.response_text, "当前音量是百分之30。");
        assert_eq!(result.before_value, 30);
        assert_eq!(result.after_value, 30);
    }

    #[tokio::test]
    async fn set_volume_postcondition_holds_before_reply() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("把音量调到70%")).await;
        assert!(result.success);
        assert_eq!(fx.volume.get(), 70);
        assert_eq!(result.response_text, "音量已设置为百分之70。");
        assert_eq!(result.before_value, 30);
        assert_eq!(result.after_value, 70);
    }

    #[tokio::test]
    async fn relative_increase_reports_delta_and_result() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("音量调大20%")).await;
        assert!(result.success);
        assert_eq!(fx.volume.get(), 50);
        assert_eq!(result.response_text, "已将音量增大百分之20，当前为百分之50。");
    }

    #[tokio::test]
    async fn repeated_request_hits_cache_without_reexecuting() {
        let fx = fixture(30);
        let msg = voice_msg("把音量调到70%");

        let first = fx.plane.try_handle_message(&msg).await;
        assert!(first.success);
        assert!(!first.dedup_hit);
        assert_eq!(fx.volume.set_count(), 1);

        let second = fx.plane.try_handle_message(&msg).await;
        assert!(second.success);
        assert!(second.dedup_hit);
        assert_eq!(second.response_text, first.response_text);
        // Execute was not run a second time.
        assert_eq!(fx.volume.set_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idempotent_reboot_arms_one_timer() {
        let fx = fixture(30);
        let msg = voice_msg("30秒后重启");

        let first = fx.plane.try_handle_message(&msg).await;
        assert!(first.success);
        assert!(first.pending_action);
        assert_eq!(first.response_text, "设备将在30.0秒后重启。");

        let second = fx.plane.try_handle_message(&msg).await;
        assert!(second.dedup_hit);
        assert_eq!(second.response_text, first.response_text);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fx.host.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clarification_is_recognized_but_failed() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("把音量设置一下")).await;
        assert!(result.handled);
        assert!(!result.success);
        assert!(result.response_text.contains("未识别到目标音量"));
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_fires_reminder_on_originating_channel() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("3秒后提醒我喝水")).await;
        assert!(result.success);
        assert!(result.pending_action);
        assert!(result.response_text.starts_with("已创建闹钟#1"));
        assert_eq!(fx.plane.active_alarms().len(), 1);

        let reminder = fx
            .bus
            .pop_outbound(Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(reminder.channel, Channel::Voice);
        assert_eq!(reminder.chat_id, "voice");
        assert_eq!(reminder.content, "闹钟提醒：喝水");
        assert!(fx.plane.active_alarms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_alarm_cannot_fire() {
        let fx = fixture(30);
        fx.plane.try_handle_message(&voice_msg("5秒后提醒我喝水")).await;

        let cleared = fx.plane.try_handle_message(&voice_msg("清空闹钟")).await;
        assert!(cleared.success);
        assert_eq!(cleared.response_text, "已取消全部闹钟（1个）。");

        tokio::time::sleep(Duration::from_secs(10)).await;
        let err = fx
            .bus
            .pop_outbound(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, mimi_bus::BusError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_pool_capacity_is_enforced() {
        let cfg = ControlConfig {
            max_alarms: 2,
            ..ControlConfig::default()
        };
        let fx = fixture_with(cfg, 30);

        assert!(fx.plane.try_handle_message(&voice_msg("5分钟后提醒我晾衣服")).await.success);
        assert!(fx.plane.try_handle_message(&voice_msg("6分钟后提醒我收快递")).await.success);

        let third = fx.plane.try_handle_message(&voice_msg("7分钟后提醒我倒垃圾")).await;
        assert!(third.handled);
        assert!(!third.success);
        assert!(third.response_text.contains("闹钟已满"));
    }

    #[tokio::test]
    async fn alarm_clear_unknown_id_is_not_found() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("取消闹钟9")).await;
        assert!(!result.success);
        assert!(result.response_text.contains("未找到闹钟#9"));
    }

    #[tokio::test]
    async fn temperature_remind_rule_fires_and_cools_down() {
        let fx = fixture(30);
        let created = fx
            .plane
            .try_handle_message(&voice_msg("温度高于30度提醒我关窗"))
            .await;
        assert!(created.success, "{}", created.response_text);

        fx.plane.handle_temperature_event(305).await;
        let reminder = fx
            .bus
            .pop_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(reminder.channel, Channel::System);
        assert_eq!(reminder.content, "温度触发提醒：当前30.5°C，关窗");

        // Within the cool-down the same rule stays quiet.
        fx.plane.handle_temperature_event(320).await;
        assert!(fx
            .bus
            .pop_outbound(Some(Duration::from_millis(50)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn temperature_volume_rule_reenters_set_volume() {
        let fx = fixture(80);
        let created = fx
            .plane
            .try_handle_message(&voice_msg("温度高于30度时音量调到40%"))
            .await;
        assert!(created.success, "{}", created.response_text);

        fx.plane.handle_temperature_event(310).await;
        assert_eq!(fx.volume.get(), 40);

        // Still inside the cool-down window: no further action.
        fx.volume.set(80);
        fx.plane.handle_temperature_event(310).await;
        assert_eq!(fx.volume.get(), 80);
    }

    #[tokio::test]
    async fn music_playback_is_silent_on_success() {
        let fx = fixture(30);
        let result = fx.plane.try_handle_message(&voice_msg("放首歌晴天")).await;
        assert!(result.handled);
        assert!(result.success);
        assert!(result.pending_action);
        assert!(result.response_text.is_empty());
        assert_eq!(fx.voice.plays.load(Ordering::SeqCst), 1);

        let stop = fx.plane.try_handle_message(&voice_msg("停止音乐")).await;
        assert!(stop.success);
        assert_eq!(stop.response_text, "已停止音乐播放。");
        assert_eq!(fx.voice.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn audit_ring_keeps_newest_entries() {
        let cfg = ControlConfig {
            audit_size: 2,
            ..ControlConfig::default()
        };
        let fx = fixture_with(cfg, 30);

        fx.plane.try_handle_message(&voice_msg("现在音量是多少？")).await;
        fx.plane.try_handle_message(&voice_msg("把音量调到70%")).await;
        fx.plane.try_handle_message(&voice_msg("音量调大10%")).await;

        let audits = fx.plane.recent_audits(10);
        assert_eq!(audits.len(), 2);
        // Newest first.
        assert!(audits[0].summary.contains("增大"));
        assert!(audits[1].summary.contains("音量已设置为"));
    }

    #[tokio::test]
    async fn temp_rule_listing_and_clearing() {
        let fx = fixture(30);
        fx.plane
            .try_handle_message(&voice_msg("温度高于30度时音量调到40%"))
            .await;

        let listed = fx.plane.try_handle_message(&voice_msg("查看温度规则")).await;
        assert!(listed.success);
        assert!(listed.response_text.contains("#1(>=30.0°C->40%)"));

        let cleared = fx.plane.try_handle_message(&voice_msg("清空温度规则")).await;
        assert!(cleared.success);
        assert_eq!(cleared.response_text, "已清空温度规则（1条）。");
        assert!(fx.plane.temperature_rules().is_empty());
    }
}
