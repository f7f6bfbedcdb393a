//! The turn orchestrator: exactly one inbound message per turn, exactly
//! one final outbound response (or a silent control success), with the
//! control-plane fast path tried before any LLM call.
//!
//! Flow: pop inbound → control plane → (fast path ∨ ReAct loop) →
//! session persistence → outbound push → stats.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use mimi_bus::{BusMessage, Channel, MessageBus};
use mimi_control::ControlPlane;
use mimi_core::config::AgentConfig;
use mimi_sessions::{Role, SessionStore};

use crate::hints::HintEngine;
use crate::prompt::{self, PromptBuilder};
use crate::provider::{ChatMessage, ChatModel, ContentBlock, ProviderError, ToolCall};
use crate::stats::{StatsTracker, TurnOutcome};
use crate::tools::ToolRegistry;

const TOOL_TRUNCATED_SUFFIX: &str = "\n...[tool output truncated by budget]";
const TOOL_BUDGET_EXCEEDED_MSG: &str = "Error: tool result budget exceeded on device";

const MSG_TIMEOUT: &str = "这次处理超时了，请把问题拆小一点再试。";
const MSG_CONTEXT_TOO_LARGE: &str = "上下文太长了，请精简后再问我。";
const MSG_CONTEXT_UNAVAILABLE: &str = "设备内存紧张，暂时无法继续处理。";
const MSG_TOOL_BUDGET: &str = "工具返回内容太大了，请把任务范围缩小一点。";
const MSG_ITER_LIMIT: &str = "工具调用次数到上限了，请换个更简短的问法。";
const MSG_LLM_AUTH: &str =
    "LLM 鉴权失败：API Key 无效或已过期。请在 mimi.toml 的 [llm] 配置中更新 api_key 后重启。";
const MSG_LLM_FAILED: &str = "LLM 调用失败，请稍后重试。";
const MSG_GENERIC_ERROR: &str = "Sorry, I encountered an error.";

const WORKING_PHRASES: &[&str] = &[
    "mimi\u{1F617}is working...",
    "mimi\u{1F43E} is thinking...",
    "mimi\u{1F4AD} is pondering...",
    "mimi\u{1F319} is on it...",
    "mimi\u{2728} is cooking...",
];

pub struct Orchestrator {
    cfg: AgentConfig,
    session_max: usize,
    bus: Arc<MessageBus>,
    control: Arc<ControlPlane>,
    sessions: Arc<SessionStore>,
    prompt: PromptBuilder,
    hints: HintEngine,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    stats: Arc<StatsTracker>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: AgentConfig,
        session_max: usize,
        bus: Arc<MessageBus>,
        control: Arc<ControlPlane>,
        sessions: Arc<SessionStore>,
        prompt: PromptBuilder,
        hints: HintEngine,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            cfg,
            session_max,
            bus,
            control,
            sessions,
            prompt,
            hints,
            model,
            tools,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.stats)
    }

    /// Consume inbound messages until shutdown. Turns never interleave: a
    /// message runs to completion before the next pop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("orchestrator started");
        loop {
            tokio::select! {
                popped = self.bus.pop_inbound(None) => {
                    match popped {
                        Ok(msg) => self.handle_message(msg).await,
                        Err(_) => {
                            info!("inbound queue closed, orchestrator exiting");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run exactly one turn.
    pub async fn handle_message(&self, msg: BusMessage) {
        let run_id = self.stats.next_run_id();
        let turn_start = Instant::now();
        let mut outcome = TurnOutcome {
            run_id,
            ..TurnOutcome::default()
        };

        info!(run_id, channel = %msg.channel, chat_id = %msg.chat_id, "ingress");

        // Rule-first: deterministic control commands skip the LLM entirely.
        let control_result = self.control.try_handle_message(&msg).await;
        if control_result.handled {
            let outbound_start = Instant::now();
            let mut produced_final = false;

            if !control_result.response_text.is_empty() {
                // Source behavior: the user turn is recorded only together
                // with a non-empty assistant reply.
                self.session_append(&msg.chat_id, Role::User, &msg.content);
                self.session_append(&msg.chat_id, Role::Assistant, &control_result.response_text);

                let out = BusMessage::text(msg.channel, &msg.chat_id, &control_result.response_text);
                if self.bus.push_outbound(out).await.is_err() {
                    outcome.outbound_enqueue_failed = true;
                } else {
                    produced_final = true;
                }
            } else if control_result.success {
                // Silent deterministic action (e.g. music playback).
                produced_final = true;
            }
            outcome.outbound_ms = ms_since(outbound_start);

            let response_ready = control_result.response_text.is_empty() || produced_final;
            outcome.success =
                control_result.success && response_ready && !outcome.outbound_enqueue_failed;
            outcome.total_ms = ms_since(turn_start);
            self.stats.record(&outcome);
            info!(
                run_id,
                success = outcome.success,
                total_ms = outcome.total_ms,
                outbound_ms = outcome.outbound_ms,
                capability = %control_result.capability,
                dedup_hit = control_result.dedup_hit,
                "turn done via control plane"
            );
            return;
        }

        // Context stage: system prompt + history + composed user content.
        let context_start = Instant::now();
        let mut system_prompt = self.prompt.build();
        prompt::append_turn_context(&mut system_prompt, &msg, self.cfg.context_buf_size);

        let mut messages: Vec<ChatMessage> = self
            .sessions
            .history(&msg.chat_id, Some(self.session_max))
            .unwrap_or_default()
            .into_iter()
            .map(|t| match t.role {
                Role::User => ChatMessage::user_text(t.text),
                Role::Assistant => ChatMessage::assistant_text(t.text),
            })
            .collect();

        let user_text = self.hints.compose_user_content(&msg);
        messages.push(ChatMessage::user_text(user_text.clone()));
        outcome.context_ms = ms_since(context_start);

        // ReAct loop.
        let tool_defs = self.tools.definitions();
        let mut final_text: Option<String> = None;
        let mut produced_final = false;
        let mut iteration: u32 = 0;
        let mut sent_working_status = false;

        while iteration < self.cfg.max_tool_iter {
            if ms_since(turn_start) > self.cfg.turn_timeout_ms {
                warn!(run_id, timeout_ms = self.cfg.turn_timeout_ms, "turn timeout exceeded");
                outcome.hit_timeout = true;
                final_text = Some(MSG_TIMEOUT.to_string());
                break;
            }

            match context_bytes(&system_prompt, &messages) {
                Some(bytes) if bytes > self.cfg.max_context_bytes => {
                    warn!(
                        run_id,
                        context_bytes = bytes,
                        max = self.cfg.max_context_bytes,
                        "context budget exceeded"
                    );
                    outcome.hit_context_budget = true;
                    final_text = Some(MSG_CONTEXT_TOO_LARGE.to_string());
                    break;
                }
                Some(_) => {}
                None => {
                    error!(run_id, "failed to serialize conversation for budgeting");
                    outcome.hit_context_budget = true;
                    final_text = Some(MSG_CONTEXT_UNAVAILABLE.to_string());
                    break;
                }
            }

            if self.cfg.send_working_status
                && !sent_working_status
                && msg.channel != Channel::System
            {
                let status = BusMessage::text(msg.channel, &msg.chat_id, pick_working_phrase());
                if self.bus.push_outbound(status).await.is_ok() {
                    sent_working_status = true;
                }
            }

            let llm_start = Instant::now();
            let reply = self
                .model
                .chat_tools(&system_prompt, &messages, &tool_defs)
                .await;
            outcome.llm_ms += ms_since(llm_start);

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!(run_id, error = %e, "LLM call failed");
                    outcome.hit_llm_error = true;
                    final_text = Some(match e {
                        ProviderError::Auth(_) => MSG_LLM_AUTH.to_string(),
                        _ => MSG_LLM_FAILED.to_string(),
                    });
                    break;
                }
            };

            if !reply.wants_tools() {
                if !reply.text.is_empty() {
                    final_text = Some(reply.text);
                    produced_final = true;
                }
                break;
            }

            info!(run_id, iteration = iteration + 1, calls = reply.calls.len(), "tool use iteration");
            messages.push(ChatMessage::assistant_tool_use(&reply));

            let tools_start = Instant::now();
            let (result_blocks, budget_exceeded) = self.run_tools(run_id, &reply.calls).await;
            outcome.tools_ms += ms_since(tools_start);
            messages.push(ChatMessage::tool_results(result_blocks));

            if budget_exceeded {
                warn!(
                    run_id,
                    cap = self.cfg.tool_results_total_max,
                    "tool result budget exceeded"
                );
                outcome.hit_tool_budget = true;
                final_text = Some(MSG_TOOL_BUDGET.to_string());
                break;
            }
            iteration += 1;
        }

        if final_text.is_none() && iteration >= self.cfg.max_tool_iter {
            warn!(run_id, max_iter = self.cfg.max_tool_iter, "tool iteration limit reached");
            outcome.hit_iter_limit = true;
            final_text = Some(MSG_ITER_LIMIT.to_string());
        }

        // Finalize: the user always gets a response on the source channel.
        let outbound_start = Instant::now();
        match final_text {
            Some(text) if !text.is_empty() => {
                self.session_append(&msg.chat_id, Role::User, &user_text);
                self.session_append(&msg.chat_id, Role::Assistant, &text);

                let out = BusMessage::text(msg.channel, &msg.chat_id, text);
                if self.bus.push_outbound(out).await.is_err() {
                    error!(run_id, channel = %msg.channel, chat_id = %msg.chat_id, "failed to enqueue final response");
                    outcome.outbound_enqueue_failed = true;
                }
            }
            _ => {
                let out = BusMessage::text(msg.channel, &msg.chat_id, MSG_GENERIC_ERROR);
                if self.bus.push_outbound(out).await.is_err() {
                    outcome.outbound_enqueue_failed = true;
                }
            }
        }
        outcome.outbound_ms = ms_since(outbound_start);

        outcome.total_ms = ms_since(turn_start);
        outcome.success = produced_final
            && !outcome.hit_timeout
            && !outcome.hit_context_budget
            && !outcome.hit_tool_budget
            && !outcome.hit_iter_limit
            && !outcome.hit_llm_error
            && !outcome.outbound_enqueue_failed;
        self.stats.record(&outcome);

        info!(
            run_id,
            success = outcome.success,
            total_ms = outcome.total_ms,
            context_ms = outcome.context_ms,
            llm_ms = outcome.llm_ms,
            tools_ms = outcome.tools_ms,
            outbound_ms = outcome.outbound_ms,
            iteration,
            "turn done"
        );
    }

    /// Execute one iteration's tool calls with bytes accounting.
    ///
    /// Each result is truncated to the per-tool cap (suffix included). The
    /// cumulative cap is accounted against pre-truncation sizes; once
    /// crossed, the current and all later outputs are replaced by the
    /// budget marker and the turn fails.
    async fn run_tools(&self, run_id: u32, calls: &[ToolCall]) -> (Vec<ContentBlock>, bool) {
        let mut blocks = Vec::with_capacity(calls.len());
        let mut total_bytes = 0usize;
        let mut exhausted = false;

        for call in calls {
            let output = if exhausted {
                TOOL_BUDGET_EXCEEDED_MSG.to_string()
            } else {
                let raw = self.tools.execute(&call.name, call.input.clone()).await;
                if total_bytes + raw.len() > self.cfg.tool_results_total_max {
                    exhausted = true;
                    TOOL_BUDGET_EXCEEDED_MSG.to_string()
                } else {
                    total_bytes += raw.len();
                    truncate_tool_output(raw, self.cfg.tool_result_max_bytes)
                }
            };

            info!(run_id, tool = %call.name, bytes = output.len(), "tool result");
            blocks.push(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: output,
            });
        }

        (blocks, exhausted)
    }

    fn session_append(&self, chat_id: &str, role: Role, text: &str) {
        if let Err(e) = self.sessions.append(chat_id, role, text) {
            warn!(chat_id, error = %e, "session append failed");
        }
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// system prompt bytes + serialized conversation bytes; `None` when the
/// conversation cannot be serialized.
fn context_bytes(system_prompt: &str, messages: &[ChatMessage]) -> Option<usize> {
    serde_json::to_string(messages)
        .ok()
        .map(|s| system_prompt.len() + s.len())
}

/// Cap a tool result at `max` bytes, suffix included, cutting on a char
/// boundary so the marker is always intact and visible.
fn truncate_tool_output(mut output: String, max: usize) -> String {
    if output.len() <= max {
        return output;
    }
    if max <= TOOL_TRUNCATED_SUFFIX.len() {
        let mut cut = max;
        while cut > 0 && !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        return output;
    }
    let mut cut = max - TOOL_TRUNCATED_SUFFIX.len();
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TOOL_TRUNCATED_SUFFIX);
    output
}

fn pick_working_phrase() -> &'static str {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    WORKING_PHRASES[nanos as usize % WORKING_PHRASES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use mimi_bus::MediaType;
    use mimi_control::ControlPlane;
    use mimi_core::config::{BusConfig, ControlConfig};
    use mimi_core::device::{HostControl, SoftVolume, VoiceBackend, VolumeSink};
    use mimi_memory::MemoryStore;

    use crate::provider::{ChatReply, ToolDefinition};
    use crate::tools::{Tool, ToolResult};

    struct ScriptedReply {
        result: Result<ChatReply, ProviderError>,
        delay: Duration,
    }

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<ScriptedReply>>,
        requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedModel {
        fn push_text(&self, text: &str) {
            self.replies.lock().unwrap().push_back(ScriptedReply {
                result: Ok(ChatReply {
                    text: text.to_string(),
                    calls: Vec::new(),
                    stop_reason: "end_turn".to_string(),
                }),
                delay: Duration::ZERO,
            });
        }

        fn push_calls(&self, calls: Vec<ToolCall>) {
            self.push_calls_delayed(calls, Duration::ZERO);
        }

        fn push_calls_delayed(&self, calls: Vec<ToolCall>, delay: Duration) {
            self.replies.lock().unwrap().push_back(ScriptedReply {
                result: Ok(ChatReply {
                    text: String::new(),
                    calls,
                    stop_reason: "tool_use".to_string(),
                }),
                delay,
            });
        }

        fn push_error(&self, err: ProviderError) {
            self.replies.lock().unwrap().push_back(ScriptedReply {
                result: Err(err),
                delay: Duration::ZERO,
            });
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat_tools(
            &self,
            system_prompt: &str,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatReply, ProviderError> {
            self.requests
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), messages.to_vec()));
            let scripted = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ScriptedReply {
                    result: Err(ProviderError::Parse("script exhausted".to_string())),
                    delay: Duration::ZERO,
                });
            if scripted.delay > Duration::ZERO {
                tokio::time::sleep(scripted.delay).await;
            }
            scripted.result
        }
    }

    struct DateTool;

    #[async_trait]
    impl Tool for DateTool {
        fn name(&self) -> &str {
            "get_current_time"
        }

        fn description(&self) -> &str {
            "date"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("2026-08-01 10:00:00 (Saturday)")
        }
    }

    struct BigTool;

    #[async_trait]
    impl Tool for BigTool {
        fn name(&self) -> &str {
            "dump"
        }

        fn description(&self) -> &str {
            "big output"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("x".repeat(3072))
        }
    }

    struct NullVoice;

    #[async_trait]
    impl VoiceBackend for NullVoice {
        async fn speak(&self, _text: &str) -> mimi_core::Result<()> {
            Ok(())
        }

        async fn play_music(&self, _query: &str) -> mimi_core::Result<()> {
            Ok(())
        }

        async fn stop_music(&self) -> mimi_core::Result<()> {
            Ok(())
        }
    }

    struct NullHost;

    impl HostControl for NullHost {
        fn restart(&self) {}
    }

    struct Fixture {
        orchestrator: Orchestrator,
        bus: Arc<MessageBus>,
        sessions: Arc<SessionStore>,
        model: Arc<ScriptedModel>,
        stats: Arc<StatsTracker>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(cfg: AgentConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let volume: Arc<dyn VolumeSink> = Arc::new(SoftVolume::new(30));
        let control = Arc::new(ControlPlane::new(
            ControlConfig::default(),
            Arc::clone(&bus),
            Arc::clone(&volume),
            Arc::new(NullVoice),
            Arc::new(NullHost),
        ));
        let sessions = Arc::new(SessionStore::open(dir.path().join("sessions"), 20).unwrap());
        let memory = Arc::new(MemoryStore::open(dir.path().join("memory"), 16 * 1024).unwrap());
        let prompt = PromptBuilder::new(dir.path().join("config"), memory, cfg.context_buf_size);
        let hints = HintEngine::new(
            dir.path().join("config"),
            cfg.route_hint_reload_ms,
            cfg.skill_rule_reload_ms,
        );
        let model = Arc::new(ScriptedModel::default());
        let tools = Arc::new(ToolRegistry::new(vec![Box::new(DateTool), Box::new(BigTool)]));
        let stats = Arc::new(StatsTracker::new());

        let orchestrator = Orchestrator::new(
            cfg,
            20,
            Arc::clone(&bus),
            control,
            Arc::clone(&sessions),
            prompt,
            hints,
            Arc::clone(&model) as Arc<dyn ChatModel>,
            tools,
            Arc::clone(&stats),
        );
        Fixture {
            orchestrator,
            bus,
            sessions,
            model,
            stats,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        // Status messages off by default to keep outbound assertions tight;
        // the dedicated test switches them on.
        fixture_with(AgentConfig {
            send_working_status: false,
            ..AgentConfig::default()
        })
    }

    fn telegram(content: &str) -> BusMessage {
        BusMessage::text(Channel::Telegram, "C", content)
    }

    async fn pop_final(bus: &MessageBus) -> BusMessage {
        bus.pop_outbound(Some(Duration::from_secs(5))).await.unwrap()
    }

    #[tokio::test]
    async fn plain_text_turn_produces_one_outbound_and_a_session_pair() {
        let fx = fixture();
        fx.model.push_text("你好！有什么可以帮你？");

        fx.orchestrator.handle_message(telegram("你好")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.channel, Channel::Telegram);
        assert_eq!(out.chat_id, "C");
        assert_eq!(out.content, "你好！有什么可以帮你？");

        let turns = fx.sessions.history("C", None).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "你好");
        assert_eq!(turns[1].role, Role::Assistant);

        let snap = fx.stats.snapshot();
        assert_eq!(snap.total_turns, 1);
        assert_eq!(snap.success_turns, 1);
    }

    #[tokio::test]
    async fn single_tool_call_round_trip() {
        let fx = fixture();
        fx.model.push_calls(vec![ToolCall {
            id: "tu_1".to_string(),
            name: "get_current_time".to_string(),
            input: serde_json::json!({}),
        }]);
        fx.model.push_text("今天是2026-08-01。");

        fx.orchestrator.handle_message(telegram("今天几号？")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, "今天是2026-08-01。");

        let turns = fx.sessions.history("C", None).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "今天几号？");
        assert_eq!(turns[1].text, "今天是2026-08-01。");

        // The second request carries the assistant tool_use turn and the
        // tool_result turn.
        let requests = fx.model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].1;
        assert_eq!(second.len(), 3);
        match &second[1].content {
            crate::provider::MessageContent::Blocks(blocks) => {
                assert!(matches!(blocks[0], ContentBlock::ToolUse { .. }));
            }
            other => panic!("expected blocks, got {other:?}"),
        }
        match &second[2].content {
            crate::provider::MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { tool_use_id, content } => {
                    assert_eq!(tool_use_id, "tu_1");
                    assert_eq!(content, "2026-08-01 10:00:00 (Saturday)");
                }
                other => panic!("expected tool_result, got {other:?}"),
            },
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_budget_exceeded_mid_iteration_fails_the_turn() {
        let fx = fixture();
        fx.model.push_calls(vec![
            ToolCall {
                id: "tu_1".to_string(),
                name: "dump".to_string(),
                input: serde_json::json!({}),
            },
            ToolCall {
                id: "tu_2".to_string(),
                name: "dump".to_string(),
                input: serde_json::json!({}),
            },
        ]);

        fx.orchestrator.handle_message(telegram("dump everything")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_TOOL_BUDGET);
        let snap = fx.stats.snapshot();
        assert_eq!(snap.tool_budget_hits, 1);
        assert_eq!(snap.failed_turns, 1);
    }

    #[tokio::test]
    async fn run_tools_truncates_first_and_replaces_second() {
        let fx = fixture();
        let calls = vec![
            ToolCall {
                id: "tu_1".to_string(),
                name: "dump".to_string(),
                input: serde_json::json!({}),
            },
            ToolCall {
                id: "tu_2".to_string(),
                name: "dump".to_string(),
                input: serde_json::json!({}),
            },
        ];
        let (blocks, exhausted) = fx.orchestrator.run_tools(1, &calls).await;
        assert!(exhausted);
        match &blocks[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content.len(), 2048);
                assert!(content.ends_with(TOOL_TRUNCATED_SUFFIX));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
        match &blocks[1] {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content, TOOL_BUDGET_EXCEEDED_MSG);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn context_budget_aborts_before_any_llm_call() {
        let fx = fixture_with(AgentConfig {
            send_working_status: false,
            max_context_bytes: 10,
            ..AgentConfig::default()
        });

        fx.orchestrator.handle_message(telegram("hi")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_CONTEXT_TOO_LARGE);
        assert_eq!(fx.model.request_count(), 0);
        assert_eq!(fx.stats.snapshot().context_budget_hits, 1);
    }

    #[tokio::test]
    async fn auth_error_yields_the_credential_message() {
        let fx = fixture();
        fx.model.push_error(ProviderError::Auth("invalid x-api-key".to_string()));

        fx.orchestrator.handle_message(telegram("hello")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_LLM_AUTH);
        let snap = fx.stats.snapshot();
        assert_eq!(snap.llm_error_turns, 1);
        assert_eq!(snap.failed_turns, 1);
    }

    #[tokio::test]
    async fn transient_llm_error_yields_retry_later() {
        let fx = fixture();
        fx.model.push_error(ProviderError::Api {
            status: 500,
            message: "overloaded".to_string(),
        });

        fx.orchestrator.handle_message(telegram("hello")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_LLM_FAILED);
    }

    #[tokio::test]
    async fn iteration_limit_is_enforced() {
        let fx = fixture_with(AgentConfig {
            send_working_status: false,
            max_tool_iter: 2,
            ..AgentConfig::default()
        });
        for _ in 0..3 {
            fx.model.push_calls(vec![ToolCall {
                id: "tu".to_string(),
                name: "get_current_time".to_string(),
                input: serde_json::json!({}),
            }]);
        }

        fx.orchestrator.handle_message(telegram("loop forever")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_ITER_LIMIT);
        assert_eq!(fx.stats.snapshot().iter_limit_hits, 1);
        // Two iterations ran, so two LLM calls were made.
        assert_eq!(fx.model.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_timeout_fails_the_turn() {
        let fx = fixture();
        fx.model.push_calls_delayed(
            vec![ToolCall {
                id: "tu".to_string(),
                name: "get_current_time".to_string(),
                input: serde_json::json!({}),
            }],
            Duration::from_secs(46),
        );

        fx.orchestrator.handle_message(telegram("slow")).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.content, MSG_TIMEOUT);
        assert_eq!(fx.stats.snapshot().timeout_turns, 1);
    }

    #[tokio::test]
    async fn voice_fast_path_skips_the_model() {
        let fx = fixture();
        let msg = BusMessage {
            channel: Channel::Voice,
            chat_id: "voice".to_string(),
            media_type: MediaType::Voice,
            file_id: None,
            file_path: None,
            content: "现在音量是多少？".to_string(),
            meta_json: None,
        };

        fx.orchestrator.handle_message(msg).await;

        let out = pop_final(&fx.bus).await;
        assert_eq!(out.channel, Channel::Voice);
        assert_eq!(out.content, "当前音量是百分之30。");
        assert_eq!(fx.model.request_count(), 0);

        let turns = fx.sessions.history("voice", None).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "现在音量是多少？");
        assert_eq!(turns[1].text, "当前音量是百分之30。");
    }

    #[tokio::test]
    async fn working_status_precedes_the_final_response() {
        let fx = fixture_with(AgentConfig::default());
        fx.model.push_text("done");

        fx.orchestrator.handle_message(telegram("hi")).await;

        let status = pop_final(&fx.bus).await;
        assert!(status.is_status(), "expected status, got {:?}", status.content);
        let final_msg = pop_final(&fx.bus).await;
        assert_eq!(final_msg.content, "done");
    }

    #[test]
    fn truncation_boundaries() {
        assert_eq!(truncate_tool_output("x".repeat(2048), 2048).len(), 2048);
        assert!(!truncate_tool_output("x".repeat(2048), 2048).contains("truncated"));

        let cut = truncate_tool_output("x".repeat(2049), 2048);
        assert_eq!(cut.len(), 2048);
        assert!(cut.ends_with(TOOL_TRUNCATED_SUFFIX));

        // Multi-byte content still cuts on a char boundary.
        let zh = truncate_tool_output("好".repeat(1000), 100);
        assert!(zh.len() <= 100);
        assert!(zh.ends_with(TOOL_TRUNCATED_SUFFIX));
    }
}
