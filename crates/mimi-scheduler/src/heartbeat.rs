//! Heartbeat service: periodically turns `HEARTBEAT.md` into a
//! `system`-channel inbound message so the agent keeps up with standing
//! tasks without anyone messaging it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use mimi_bus::{BusMessage, Channel, MediaType, MessageBus};
use mimi_core::config::HeartbeatConfig;

const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

#[derive(Debug, Clone, Default, Serialize)]
pub struct HeartbeatStats {
    pub total_runs: u32,
    pub triggered_runs: u32,
    pub enqueue_success: u32,
    pub enqueue_failures: u32,
    pub skipped_no_file: u32,
    pub skipped_empty: u32,
    pub last_run_unix: i64,
}

pub struct HeartbeatService {
    cfg: HeartbeatConfig,
    bus: Arc<MessageBus>,
    config_dir: PathBuf,
    stats: Mutex<HeartbeatStats>,
    notify: Notify,
}

impl HeartbeatService {
    pub fn new(cfg: HeartbeatConfig, bus: Arc<MessageBus>, config_dir: PathBuf) -> Self {
        Self {
            cfg,
            bus,
            config_dir,
            stats: Mutex::new(HeartbeatStats::default()),
            notify: Notify::new(),
        }
    }

    pub fn stats(&self) -> HeartbeatStats {
        self.stats.lock().unwrap().clone()
    }

    /// Fire outside the regular cadence.
    pub fn trigger_now(&self) {
        self.notify.notify_one();
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.interval_secs,
            file = %self.config_dir.join(HEARTBEAT_FILE).display(),
            "heartbeat service started"
        );
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    self.run_once("manual").await;
                }
                _ = tokio::time::sleep(Duration::from_secs(self.cfg.interval_secs)) => {
                    self.run_once("interval").await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_once(&self, reason: &str) {
        let now = Local::now();
        {
            let mut st = self.stats.lock().unwrap();
            st.total_runs += 1;
            st.last_run_unix = now.timestamp();
        }

        let tasks = match self.load_actionable_text() {
            LoadOutcome::Missing => {
                self.stats.lock().unwrap().skipped_no_file += 1;
                debug!("heartbeat skip: file missing");
                return;
            }
            LoadOutcome::Empty => {
                self.stats.lock().unwrap().skipped_empty += 1;
                debug!("heartbeat skip: no actionable content");
                return;
            }
            LoadOutcome::Text(t) => t,
        };

        let payload = format!(
            "Heartbeat trigger ({reason}) at {}.\n\
             Follow tasks below; keep updates concise:\n{tasks}",
            now.format("%Y-%m-%d %H:%M:%S")
        );
        let payload_bytes = payload.len();

        let msg = BusMessage {
            channel: Channel::System,
            chat_id: "heartbeat".to_string(),
            media_type: MediaType::System,
            file_id: None,
            file_path: None,
            content: payload,
            meta_json: None,
        };

        if self.bus.push_inbound(msg).await.is_ok() {
            let mut st = self.stats.lock().unwrap();
            st.triggered_runs += 1;
            st.enqueue_success += 1;
            info!(reason, payload_bytes, "heartbeat triggered");
        } else {
            self.stats.lock().unwrap().enqueue_failures += 1;
            warn!(reason, "heartbeat enqueue failed");
        }
    }

    fn load_actionable_text(&self) -> LoadOutcome {
        let raw = match std::fs::read_to_string(self.config_dir.join(HEARTBEAT_FILE)) {
            Ok(raw) => raw,
            Err(_) => return LoadOutcome::Missing,
        };

        let mut text = String::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if text.len() + line.len() + 1 > self.cfg.max_bytes {
                break;
            }
            text.push_str(line);
            text.push('\n');
        }

        if text.is_empty() {
            LoadOutcome::Empty
        } else {
            LoadOutcome::Text(text)
        }
    }
}

enum LoadOutcome {
    Missing,
    Empty,
    Text(String),
}
