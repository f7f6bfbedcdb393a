//! Single-job cron compatibility service.
//!
//! Exactly one schedule exists at a time: an interval in minutes plus the
//! task text handed to the agent. The schedule survives restarts through
//! the `cron_cfg` KV namespace, with `CRON.md` as a file fallback for
//! deployments provisioned by copying config files around.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use mimi_bus::{BusMessage, Channel, MediaType, MessageBus};
use mimi_core::config::CronConfig;
use mimi_core::kv::KvStore;

use crate::error::{Result, SchedulerError};

pub const CRON_NAMESPACE: &str = "cron_cfg";
const KEY_INTERVAL: &str = "interval_min";
const KEY_TASK: &str = "task";
const CRON_FILE: &str = "CRON.md";
const TASK_MAX_BYTES: usize = 768;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CronStats {
    pub enabled: bool,
    pub interval_min: u16,
    pub total_runs: u32,
    pub triggered_runs: u32,
    pub enqueue_success: u32,
    pub enqueue_failures: u32,
    pub skipped_not_configured: u32,
    pub last_run_unix: i64,
}

struct CronState {
    enabled: bool,
    interval_min: u16,
    task: String,
    stats: CronStats,
}

pub struct CronService {
    cfg: CronConfig,
    bus: Arc<MessageBus>,
    kv: Arc<KvStore>,
    config_dir: PathBuf,
    state: Mutex<CronState>,
    notify: Notify,
}

impl CronService {
    /// Load the persisted schedule (KV first, file fallback). A service
    /// with no valid schedule still runs, polling for one to appear.
    pub fn new(
        cfg: CronConfig,
        bus: Arc<MessageBus>,
        kv: Arc<KvStore>,
        config_dir: PathBuf,
    ) -> Self {
        let mut state = CronState {
            enabled: false,
            interval_min: 0,
            task: String::new(),
            stats: CronStats::default(),
        };

        if let Some((interval, task)) = load_from_kv(&kv, &cfg) {
            info!(interval_min = interval, "cron schedule loaded from kv");
            state.enabled = true;
            state.interval_min = interval;
            state.task = task;
        } else if let Some((interval, task)) = parse_cron_file(&config_dir.join(CRON_FILE), &cfg) {
            info!(interval_min = interval, "cron schedule loaded from file");
            state.enabled = true;
            state.interval_min = interval;
            state.task = task;
        } else {
            info!("cron disabled (no valid schedule)");
        }

        Self {
            cfg,
            bus,
            kv,
            config_dir,
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    /// Replace the schedule and persist it.
    pub fn set_schedule(&self, interval_min: u16, task: &str) -> Result<()> {
        if !self.valid_interval(interval_min) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "interval must be {}..={} minutes, got {}",
                self.cfg.min_interval_min, self.cfg.max_interval_min, interval_min
            )));
        }
        let task = task.trim();
        if task.is_empty() {
            return Err(SchedulerError::InvalidSchedule("task is empty".to_string()));
        }
        if task.len() > TASK_MAX_BYTES {
            return Err(SchedulerError::InvalidSchedule(format!(
                "task too long: {} bytes (max {})",
                task.len(),
                TASK_MAX_BYTES
            )));
        }

        self.kv.set_u16(CRON_NAMESPACE, KEY_INTERVAL, interval_min)?;
        self.kv.set_str(CRON_NAMESPACE, KEY_TASK, task)?;

        {
            let mut st = self.state.lock().unwrap();
            st.enabled = true;
            st.interval_min = interval_min;
            st.task = task.to_string();
        }
        info!(interval_min, "cron schedule set");
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the schedule and its persisted copy.
    pub fn clear_schedule(&self) -> Result<()> {
        self.kv.erase(CRON_NAMESPACE, KEY_INTERVAL)?;
        self.kv.erase(CRON_NAMESPACE, KEY_TASK)?;
        {
            let mut st = self.state.lock().unwrap();
            st.enabled = false;
            st.interval_min = 0;
            st.task.clear();
        }
        info!("cron schedule cleared");
        self.notify.notify_one();
        Ok(())
    }

    /// Fire the schedule now (manual trigger).
    pub fn trigger_now(&self) -> Result<()> {
        let st = self.state.lock().unwrap();
        if !st.enabled || st.task.is_empty() {
            return Err(SchedulerError::NotConfigured);
        }
        drop(st);
        self.notify.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> CronStats {
        let st = self.state.lock().unwrap();
        let mut stats = st.stats.clone();
        stats.enabled = st.enabled;
        stats.interval_min = st.interval_min;
        stats
    }

    pub fn task_text(&self) -> Option<String> {
        let st = self.state.lock().unwrap();
        if st.task.is_empty() {
            None
        } else {
            Some(st.task.clone())
        }
    }

    /// Service loop. Fires every `interval_min` minutes while a schedule
    /// exists, re-checks every `disabled_poll_secs` otherwise, and wakes
    /// immediately on a manual trigger or schedule change.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(fallback_file = %self.config_dir.join(CRON_FILE).display(), "cron service started");
        loop {
            let (enabled, interval_min) = {
                let st = self.state.lock().unwrap();
                (st.enabled && !st.task.is_empty(), st.interval_min)
            };
            let wait = if enabled && self.valid_interval(interval_min) {
                Duration::from_secs(u64::from(interval_min) * 60)
            } else {
                Duration::from_secs(self.cfg.disabled_poll_secs)
            };

            tokio::select! {
                _ = self.notify.notified() => {
                    self.run_once("manual").await;
                }
                _ = tokio::time::sleep(wait) => {
                    if enabled {
                        self.run_once("interval").await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_once(&self, reason: &str) {
        let (interval_min, task) = {
            let mut st = self.state.lock().unwrap();
            if !st.enabled || st.task.is_empty() || !self.valid_interval(st.interval_min) {
                st.stats.skipped_not_configured += 1;
                return;
            }
            (st.interval_min, st.task.clone())
        };

        let now = Local::now();
        let payload = format!(
            "Cron trigger ({reason}) at {}, interval={interval_min} min.\n\
             Execute the scheduled task below:\n{task}",
            now.format("%Y-%m-%d %H:%M:%S")
        );
        let payload_bytes = payload.len();

        let msg = BusMessage {
            channel: Channel::System,
            chat_id: "cron".to_string(),
            media_type: MediaType::System,
            file_id: None,
            file_path: None,
            content: payload,
            meta_json: None,
        };
        let pushed = self.bus.push_inbound(msg).await;

        let mut st = self.state.lock().unwrap();
        st.stats.total_runs += 1;
        st.stats.last_run_unix = now.timestamp();
        if pushed.is_ok() {
            st.stats.triggered_runs += 1;
            st.stats.enqueue_success += 1;
            info!(reason, interval_min, payload_bytes, "cron triggered");
        } else {
            st.stats.enqueue_failures += 1;
            warn!(reason, "cron enqueue failed");
        }
    }

    fn valid_interval(&self, interval_min: u16) -> bool {
        interval_min >= self.cfg.min_interval_min && interval_min <= self.cfg.max_interval_min
    }
}

fn load_from_kv(kv: &KvStore, cfg: &CronConfig) -> Option<(u16, String)> {
    let interval = kv.get_u16(CRON_NAMESPACE, KEY_INTERVAL).ok()??;
    let task = kv.get_str(CRON_NAMESPACE, KEY_TASK).ok()??;
    let task = task.trim().to_string();
    if task.is_empty() || interval < cfg.min_interval_min || interval > cfg.max_interval_min {
        return None;
    }
    Some((interval, task))
}

/// `CRON.md` format: `every_minutes: N` plus `task:` lines (or bare lines)
/// joined into the task text. `#` comments and blanks are skipped.
fn parse_cron_file(path: &std::path::Path, cfg: &CronConfig) -> Option<(u16, String)> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mut interval: u16 = 0;
    let mut task_lines: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(v) = line.strip_prefix("every_minutes:") {
            if let Ok(parsed) = v.trim().parse::<u16>() {
                if parsed > 0 {
                    interval = parsed;
                }
            }
            continue;
        }
        if let Some(v) = line.strip_prefix("task:") {
            let v = v.trim();
            if !v.is_empty() {
                task_lines.push(v.to_string());
            }
            continue;
        }
        task_lines.push(line.to_string());
    }

    let task = task_lines.join("\n");
    if task.is_empty()
        || task.len() > TASK_MAX_BYTES
        || interval < cfg.min_interval_min
        || interval > cfg.max_interval_min
    {
        return None;
    }
    Some((interval, task))
}
