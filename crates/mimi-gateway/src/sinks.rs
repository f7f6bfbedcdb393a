//! In-process collaborator implementations for surfaces this binary owns:
//! CLI stdout egress, a logging voice backend, host restart, and the
//! dispatcher-to-stats failure bridge. Real Telegram/WebSocket transports
//! live outside the runtime and register their own sinks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mimi_agent::StatsTracker;
use mimi_core::device::{HostControl, VoiceBackend};
use mimi_dispatch::{ChannelSink, SendFailureHook};

/// Prints assistant replies for the local CLI conversation.
pub struct CliSink;

#[async_trait]
impl ChannelSink for CliSink {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send(&self, _chat_id: &str, text: &str) -> mimi_dispatch::error::Result<()> {
        println!("mimi> {text}");
        Ok(())
    }
}

/// Voice backend for deployments without a speech pipeline attached:
/// playback requests are logged instead of synthesized.
pub struct LoggingVoice;

#[async_trait]
impl VoiceBackend for LoggingVoice {
    async fn speak(&self, text: &str) -> mimi_core::Result<()> {
        info!(%text, "voice speak");
        Ok(())
    }

    async fn play_music(&self, query: &str) -> mimi_core::Result<()> {
        info!(%query, "voice play_music");
        Ok(())
    }

    async fn stop_music(&self) -> mimi_core::Result<()> {
        info!("voice stop_music");
        Ok(())
    }
}

/// Exits the process when the reboot timer fires; the supervisor (systemd
/// or similar) brings the runtime back up.
pub struct ProcessHost;

impl HostControl for ProcessHost {
    fn restart(&self) {
        warn!("restart requested, exiting for supervisor restart");
        std::process::exit(0);
    }
}

/// Routes dispatcher permanent-failure reports into the turn statistics.
pub struct StatsFailureHook {
    stats: Arc<StatsTracker>,
}

impl StatsFailureHook {
    pub fn new(stats: Arc<StatsTracker>) -> Self {
        Self { stats }
    }
}

impl SendFailureHook for StatsFailureHook {
    fn record_outbound_send_failure(&self) {
        self.stats.record_outbound_send_failure();
    }
}
