//! The dispatcher loop: pop an outbound message, route by channel tag,
//! retry transient failures with exponential backoff, report permanent
//! failures back to the orchestrator's stats.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use mimi_bus::{BusMessage, Channel, MessageBus};
use mimi_core::config::BusConfig;
use mimi_core::device::VoiceBackend;

use crate::error::{Result, SendError};
use crate::sink::ChannelSink;

const MAX_BACKOFF_MS: u64 = 5000;

/// Callback into the orchestrator's statistics for permanent failures.
pub trait SendFailureHook: Send + Sync {
    fn record_outbound_send_failure(&self);
}

pub struct Dispatcher {
    cfg: BusConfig,
    bus: Arc<MessageBus>,
    sinks: HashMap<Channel, Arc<dyn ChannelSink>>,
    voice: Arc<dyn VoiceBackend>,
    failure_hook: Arc<dyn SendFailureHook>,
}

impl Dispatcher {
    pub fn new(
        cfg: BusConfig,
        bus: Arc<MessageBus>,
        voice: Arc<dyn VoiceBackend>,
        failure_hook: Arc<dyn SendFailureHook>,
    ) -> Self {
        Self {
            cfg,
            bus,
            sinks: HashMap::new(),
            voice,
            failure_hook,
        }
    }

    /// Register the egress sink for a channel. Later registrations for the
    /// same channel replace earlier ones.
    pub fn register(&mut self, channel: Channel, sink: Arc<dyn ChannelSink>) {
        self.sinks.insert(channel, sink);
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("outbound dispatcher started");
        loop {
            tokio::select! {
                popped = self.bus.pop_outbound(None) => {
                    match popped {
                        Ok(msg) => {
                            info!(channel = %msg.channel, chat_id = %msg.chat_id, "dispatching response");
                            self.deliver(&msg).await;
                        }
                        Err(_) => {
                            info!("outbound queue closed, dispatcher exiting");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbound dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Deliver one message. Final messages get the configured retry
    /// budget; status messages are one-shot.
    pub async fn deliver(&self, msg: &BusMessage) {
        // Unroutable messages are logged and dropped without retries.
        if msg.channel != Channel::Voice
            && msg.channel != Channel::System
            && !self.sinks.contains_key(&msg.channel)
        {
            warn!(channel = %msg.channel, "no sink for channel, dropping message");
            return;
        }

        let is_status = msg.is_status();
        let max_attempts = if is_status {
            1
        } else {
            self.cfg.outbound_send_retry_max.max(1)
        };

        for attempt in 1..=max_attempts {
            match self.send_once(msg, is_status).await {
                Ok(()) => return,
                Err(e) if attempt < max_attempts => {
                    let delay = retry_delay(self.cfg.outbound_send_retry_base_ms, attempt);
                    warn!(
                        channel = %msg.channel,
                        chat_id = %msg.chat_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "outbound send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.failure_hook.record_outbound_send_failure();
                    error!(
                        channel = %msg.channel,
                        chat_id = %msg.chat_id,
                        error = %e,
                        "outbound send failed permanently"
                    );
                }
            }
        }
    }

    async fn send_once(&self, msg: &BusMessage, is_status: bool) -> Result<()> {
        match msg.channel {
            Channel::Voice => {
                if is_status {
                    info!("voice: skipping status message");
                    return Ok(());
                }
                self.voice
                    .speak(&msg.content)
                    .await
                    .map_err(|e| SendError::Failed(e.to_string()))
            }
            Channel::System => {
                // Local-only: log and consume, no egress.
                info!(chat_id = %msg.chat_id, content = %msg.content, "system outbound (local-only)");
                Ok(())
            }
            channel => match self.sinks.get(&channel) {
                Some(sink) => sink.send(&msg.chat_id, &msg.content).await,
                None => Err(SendError::Unavailable(channel.to_string())),
            },
        }
    }
}

fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let mut delay = base_ms.max(1);
    for _ in 1..attempt {
        delay = (delay * 2).min(MAX_BACKOFF_MS);
        if delay == MAX_BACKOFF_MS {
            break;
        }
    }
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    struct FlakySink {
        fail_first: usize,
        attempts: AtomicUsize,
        delivered: Mutex<Vec<(String, String)>>,
    }

    impl FlakySink {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                attempts: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChannelSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(SendError::Failed("transient".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingVoice {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VoiceBackend for RecordingVoice {
        async fn speak(&self, text: &str) -> mimi_core::Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn play_music(&self, _query: &str) -> mimi_core::Result<()> {
            Ok(())
        }

        async fn stop_music(&self) -> mimi_core::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHook {
        failures: AtomicUsize,
    }

    impl SendFailureHook for CountingHook {
        fn record_outbound_send_failure(&self) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        voice: Arc<RecordingVoice>,
        hook: Arc<CountingHook>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let voice = Arc::new(RecordingVoice::default());
        let hook = Arc::new(CountingHook::default());
        let dispatcher = Dispatcher::new(
            BusConfig::default(),
            bus,
            Arc::clone(&voice) as Arc<dyn VoiceBackend>,
            Arc::clone(&hook) as Arc<dyn SendFailureHook>,
        );
        Fixture {
            dispatcher,
            voice,
            hook,
        }
    }

    #[tokio::test]
    async fn routes_to_the_channel_sink() {
        let mut fx = fixture();
        let sink = Arc::new(FlakySink::new(0));
        fx.dispatcher.register(Channel::Telegram, Arc::clone(&sink) as Arc<dyn ChannelSink>);

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Telegram, "chat-9", "你好"))
            .await;

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.as_slice(), &[("chat-9".to_string(), "你好".to_string())]);
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let mut fx = fixture();
        let sink = Arc::new(FlakySink::new(2));
        fx.dispatcher.register(Channel::Telegram, Arc::clone(&sink) as Arc<dyn ChannelSink>);

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Telegram, "c", "final"))
            .await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_a_permanent_failure() {
        let mut fx = fixture();
        let sink = Arc::new(FlakySink::new(usize::MAX));
        fx.dispatcher.register(Channel::Websocket, Arc::clone(&sink) as Arc<dyn ChannelSink>);

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Websocket, "c", "final"))
            .await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_messages_are_one_shot() {
        let mut fx = fixture();
        let sink = Arc::new(FlakySink::new(usize::MAX));
        fx.dispatcher.register(Channel::Telegram, Arc::clone(&sink) as Arc<dyn ChannelSink>);

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Telegram, "c", "mimi is thinking..."))
            .await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn voice_speaks_finals_but_skips_statuses() {
        let fx = fixture();

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Voice, "voice", "mimi is thinking..."))
            .await;
        assert!(fx.voice.spoken.lock().unwrap().is_empty());

        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Voice, "voice", "当前音量是百分之30。"))
            .await;
        assert_eq!(
            fx.voice.spoken.lock().unwrap().as_slice(),
            &["当前音量是百分之30。".to_string()]
        );
    }

    #[tokio::test]
    async fn unroutable_channel_is_dropped_without_failure() {
        let fx = fixture();
        fx.dispatcher
            .deliver(&BusMessage::text(Channel::Cli, "term", "hello"))
            .await;
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn system_messages_are_consumed_locally() {
        let fx = fixture();
        fx.dispatcher
            .deliver(&BusMessage::text(Channel::System, "cron", "done"))
            .await;
        assert_eq!(fx.hook.failures.load(Ordering::SeqCst), 0);
    }
}
