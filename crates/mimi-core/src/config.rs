use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (mimi.toml + MIMI_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MimiConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Filesystem layout. Everything lives under one data directory so the
/// whole runtime state can be backed up or wiped in one move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl PathsConfig {
    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("config")
    }

    pub fn memory_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("memory")
    }

    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("sessions")
    }

    pub fn kv_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("kv")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Message bus geometry and push-retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Depth of both the inbound and outbound queue.
    #[serde(default = "default_queue_len")]
    pub queue_len: usize,
    /// Max wait for an inbound enqueue before QueueFull is reported.
    #[serde(default = "default_inbound_wait_ms")]
    pub inbound_wait_ms: u64,
    /// Attempts for enqueuing a final (non-status) outbound message.
    #[serde(default = "default_outbound_queue_retry_max")]
    pub outbound_queue_retry_max: u32,
    /// First backoff delay between outbound enqueue attempts; doubles up to 5 s.
    #[serde(default = "default_outbound_queue_retry_base_ms")]
    pub outbound_queue_retry_base_ms: u64,
    /// Per-attempt wait for a free outbound slot (final messages only).
    #[serde(default = "default_outbound_final_wait_ms")]
    pub outbound_final_wait_ms: u64,
    /// Attempts for delivering a final message on its egress channel.
    #[serde(default = "default_outbound_send_retry_max")]
    pub outbound_send_retry_max: u32,
    /// First backoff delay between delivery attempts; doubles up to 5 s.
    #[serde(default = "default_outbound_send_retry_base_ms")]
    pub outbound_send_retry_base_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_len: default_queue_len(),
            inbound_wait_ms: default_inbound_wait_ms(),
            outbound_queue_retry_max: default_outbound_queue_retry_max(),
            outbound_queue_retry_base_ms: default_outbound_queue_retry_base_ms(),
            outbound_final_wait_ms: default_outbound_final_wait_ms(),
            outbound_send_retry_max: default_outbound_send_retry_max(),
            outbound_send_retry_base_ms: default_outbound_send_retry_base_ms(),
        }
    }
}

/// Turn orchestrator budgets and hint-cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_iter")]
    pub max_tool_iter: u32,
    /// Wall-clock budget for one whole turn.
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// Cap on the assembled system prompt.
    #[serde(default = "default_context_buf_size")]
    pub context_buf_size: usize,
    /// Hard cap on system prompt + serialized history + current user content.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    #[serde(default = "default_tool_result_max_bytes")]
    pub tool_result_max_bytes: usize,
    #[serde(default = "default_tool_results_total_max")]
    pub tool_results_total_max: usize,
    #[serde(default = "default_route_hint_reload_ms")]
    pub route_hint_reload_ms: u64,
    #[serde(default = "default_skill_rule_reload_ms")]
    pub skill_rule_reload_ms: u64,
    /// Emit one best-effort "working" status per turn on non-system channels.
    #[serde(default = "bool_true")]
    pub send_working_status: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iter: default_max_tool_iter(),
            turn_timeout_ms: default_turn_timeout_ms(),
            context_buf_size: default_context_buf_size(),
            max_context_bytes: default_max_context_bytes(),
            tool_result_max_bytes: default_tool_result_max_bytes(),
            tool_results_total_max: default_tool_results_total_max(),
            route_hint_reload_ms: default_route_hint_reload_ms(),
            skill_rule_reload_ms: default_skill_rule_reload_ms(),
            send_working_status: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: String::new(),
            base_url: default_llm_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Control-plane pool geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_idemp_cache_size")]
    pub idemp_cache_size: usize,
    #[serde(default = "default_idemp_window_ms")]
    pub idemp_window_ms: u64,
    #[serde(default = "default_max_alarms")]
    pub max_alarms: usize,
    #[serde(default = "default_max_temp_rules")]
    pub max_temp_rules: usize,
    #[serde(default = "default_audit_size")]
    pub audit_size: usize,
    #[serde(default = "default_temp_rule_cooldown_ms")]
    pub temp_rule_cooldown_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            idemp_cache_size: default_idemp_cache_size(),
            idemp_window_ms: default_idemp_window_ms(),
            max_alarms: default_max_alarms(),
            max_temp_rules: default_max_temp_rules(),
            audit_size: default_audit_size(),
            temp_rule_cooldown_ms: default_temp_rule_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// History cap fed back to the LLM, in (user, assistant) entries.
    #[serde(default = "default_session_max_msgs")]
    pub max_msgs: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_msgs: default_session_max_msgs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_cron_min_interval_min")]
    pub min_interval_min: u16,
    #[serde(default = "default_cron_max_interval_min")]
    pub max_interval_min: u16,
    /// Re-check cadence while no valid schedule is configured.
    #[serde(default = "default_cron_disabled_poll_secs")]
    pub disabled_poll_secs: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_min: default_cron_min_interval_min(),
            max_interval_min: default_cron_max_interval_min(),
            disabled_poll_secs: default_cron_disabled_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_max_bytes")]
    pub max_bytes: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_heartbeat_interval_secs(),
            max_bytes: default_heartbeat_max_bytes(),
        }
    }
}

/// Ingress sender allowlist. Empty means everyone is admitted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessConfig {
    /// Comma-separated chat/sender ids.
    #[serde(default)]
    pub allow_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchConfig {
    /// Brave Search API key; web_search reports itself unconfigured without it.
    #[serde(default)]
    pub api_key: String,
}

impl MimiConfig {
    /// Load config from a TOML file with MIMI_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MimiConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MIMI_").split("_"))
            .extract()
            .map_err(|e| crate::error::MimiError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mimi", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mimi/mimi.toml", home)
}

fn bool_true() -> bool {
    true
}

fn default_queue_len() -> usize {
    8
}
fn default_inbound_wait_ms() -> u64 {
    1000
}
fn default_outbound_queue_retry_max() -> u32 {
    3
}
fn default_outbound_queue_retry_base_ms() -> u64 {
    200
}
fn default_outbound_final_wait_ms() -> u64 {
    1200
}
fn default_outbound_send_retry_max() -> u32 {
    3
}
fn default_outbound_send_retry_base_ms() -> u64 {
    500
}
fn default_max_tool_iter() -> u32 {
    10
}
fn default_turn_timeout_ms() -> u64 {
    45_000
}
fn default_context_buf_size() -> usize {
    16 * 1024
}
fn default_max_context_bytes() -> usize {
    24 * 1024
}
fn default_tool_result_max_bytes() -> usize {
    2048
}
fn default_tool_results_total_max() -> usize {
    4096
}
fn default_route_hint_reload_ms() -> u64 {
    60_000
}
fn default_skill_rule_reload_ms() -> u64 {
    60_000
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_idemp_cache_size() -> usize {
    16
}
fn default_idemp_window_ms() -> u64 {
    30_000
}
fn default_max_alarms() -> usize {
    8
}
fn default_max_temp_rules() -> usize {
    8
}
fn default_audit_size() -> usize {
    32
}
fn default_temp_rule_cooldown_ms() -> u64 {
    60_000
}
fn default_session_max_msgs() -> usize {
    20
}
fn default_cron_min_interval_min() -> u16 {
    1
}
fn default_cron_max_interval_min() -> u16 {
    1440
}
fn default_cron_disabled_poll_secs() -> u64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    1800
}
fn default_heartbeat_max_bytes() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_budgets() {
        let cfg = MimiConfig::default();
        assert_eq!(cfg.bus.queue_len, 8);
        assert_eq!(cfg.bus.outbound_queue_retry_max, 3);
        assert_eq!(cfg.bus.outbound_final_wait_ms, 1200);
        assert_eq!(cfg.agent.max_tool_iter, 10);
        assert_eq!(cfg.agent.turn_timeout_ms, 45_000);
        assert_eq!(cfg.agent.max_context_bytes, 24 * 1024);
        assert_eq!(cfg.agent.tool_result_max_bytes, 2048);
        assert_eq!(cfg.agent.tool_results_total_max, 4096);
        assert_eq!(cfg.control.idemp_cache_size, 16);
        assert_eq!(cfg.control.max_alarms, 8);
        assert_eq!(cfg.control.audit_size, 32);
        assert_eq!(cfg.session.max_msgs, 20);
    }

    #[test]
    fn paths_derive_from_data_dir() {
        let paths = PathsConfig {
            data_dir: "/tmp/mimi-test".to_string(),
        };
        assert_eq!(
            paths.session_dir(),
            std::path::Path::new("/tmp/mimi-test/sessions")
        );
        assert_eq!(
            paths.config_dir(),
            std::path::Path::new("/tmp/mimi-test/config")
        );
    }
}
