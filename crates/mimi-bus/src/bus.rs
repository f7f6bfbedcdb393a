//! Two bounded FIFO queues with asymmetric enqueue policies.
//!
//! Inbound pushes wait briefly and report `QueueFull` so ingress channels
//! can drop or retry on their own terms. Outbound pushes distinguish
//! status-like text (one-shot, zero wait) from final responses (bounded
//! wait per attempt plus exponential backoff between attempts) because a
//! final response must not be lost while a status is disposable.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::warn;

use mimi_core::config::BusConfig;

use crate::error::{BusError, Result};
use crate::types::BusMessage;

/// Backoff ceiling between enqueue attempts.
const MAX_BACKOFF_MS: u64 = 5000;

pub struct MessageBus {
    cfg: BusConfig,
    inbound_tx: mpsc::Sender<BusMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<BusMessage>>,
    outbound_tx: mpsc::Sender<BusMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<BusMessage>>,
}

impl MessageBus {
    pub fn new(cfg: BusConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(cfg.queue_len);
        let (outbound_tx, outbound_rx) = mpsc::channel(cfg.queue_len);
        Self {
            cfg,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    /// Enqueue towards the orchestrator, waiting up to the configured
    /// inbound wait. On failure ownership returns to the caller.
    pub async fn push_inbound(&self, msg: BusMessage) -> Result<()> {
        let wait = Duration::from_millis(self.cfg.inbound_wait_ms);
        match self.inbound_tx.send_timeout(msg, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(msg)) => {
                warn!(channel = %msg.channel, "inbound queue full, rejecting message");
                Err(BusError::QueueFull(Box::new(msg)))
            }
            Err(SendTimeoutError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Blocking receive for the orchestrator. `None` waits until shutdown.
    pub async fn pop_inbound(&self, timeout: Option<Duration>) -> Result<BusMessage> {
        Self::pop(&self.inbound_rx, timeout).await
    }

    /// Enqueue towards the dispatcher.
    ///
    /// Status-like content is one-shot with zero wait. Final content is
    /// retried up to the configured attempt count, each attempt waiting up
    /// to the final-wait budget, with doubling backoff in between.
    pub async fn push_outbound(&self, msg: BusMessage) -> Result<()> {
        if msg.is_status() {
            return match self.outbound_tx.try_send(msg) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(msg)) => {
                    warn!("outbound queue full, dropping status message");
                    Err(BusError::QueueFull(Box::new(msg)))
                }
                Err(TrySendError::Closed(_)) => Err(BusError::Closed),
            };
        }

        let max_attempts = self.cfg.outbound_queue_retry_max.max(1);
        let wait = Duration::from_millis(self.cfg.outbound_final_wait_ms);
        let mut msg = msg;

        for attempt in 1..=max_attempts {
            match self.outbound_tx.send_timeout(msg, wait).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Closed(_)) => return Err(BusError::Closed),
                Err(SendTimeoutError::Timeout(rejected)) => {
                    msg = rejected;
                    if attempt == max_attempts {
                        break;
                    }
                    let delay = retry_delay(self.cfg.outbound_queue_retry_base_ms, attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "outbound queue full, retrying enqueue"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(channel = %msg.channel, chat_id = %msg.chat_id, "outbound queue full, dropping final message");
        Err(BusError::QueueFull(Box::new(msg)))
    }

    /// Blocking receive for the dispatcher. `None` waits until shutdown.
    pub async fn pop_outbound(&self, timeout: Option<Duration>) -> Result<BusMessage> {
        Self::pop(&self.outbound_rx, timeout).await
    }

    async fn pop(
        rx: &tokio::sync::Mutex<mpsc::Receiver<BusMessage>>,
        timeout: Option<Duration>,
    ) -> Result<BusMessage> {
        let mut rx = rx.lock().await;
        match timeout {
            None => rx.recv().await.ok_or(BusError::Closed),
            Some(dur) => match tokio::time::timeout(dur, rx.recv()).await {
                Ok(Some(msg)) => Ok(msg),
                Ok(None) => Err(BusError::Closed),
                Err(_) => Err(BusError::Timeout),
            },
        }
    }
}

/// Doubling backoff from `base_ms`, capped at [`MAX_BACKOFF_MS`].
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
    use crate::types::Channel;

    fn small_bus() -> MessageBus {
        MessageBus::new(BusConfig {
            queue_len: 1,
            ..BusConfig::default()
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_delay(200, 1), Duration::from_millis(200));
        assert_eq!(retry_delay(200, 2), Duration::from_millis(400));
        assert_eq!(retry_delay(200, 3), Duration::from_millis(800));
        assert_eq!(retry_delay(200, 20), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_full_returns_ownership() {
        let bus = small_bus();
        bus.push_inbound(BusMessage::text(Channel::Cli, "c", "first"))
            .await
            .unwrap();

        let err = bus
            .push_inbound(BusMessage::text(Channel::Cli, "c", "second"))
            .await
            .unwrap_err();
        match err {
            BusError::QueueFull(msg) => assert_eq!(msg.content, "second"),
            other => panic!("expected QueueFull, got {other:?}"),
        }

        // The queued message is untouched.
        let popped = bus.pop_inbound(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(popped.content, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_on_empty_queue() {
        let bus = small_bus();
        let err = bus
            .pop_inbound(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let bus = MessageBus::new(BusConfig::default());
        for i in 0..4 {
            bus.push_inbound(BusMessage::text(Channel::Cli, "c", format!("m{i}")))
                .await
                .unwrap();
        }
        for i in 0..4 {
            let msg = bus.pop_inbound(Some(Duration::from_secs(1))).await.unwrap();
            assert_eq!(msg.content, format!("m{i}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_push_is_one_shot() {
        let bus = small_bus();
        bus.push_outbound(BusMessage::text(Channel::Telegram, "c", "final answer"))
            .await
            .unwrap();

        let status = BusMessage::text(Channel::Telegram, "c", "mimi is thinking...");
        let before = tokio::time::Instant::now();
        let err = bus.push_outbound(status).await.unwrap_err();
        assert!(matches!(err, BusError::QueueFull(_)));
        // No wait, no backoff.
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn final_push_retries_until_slot_frees() {
        let bus = std::sync::Arc::new(small_bus());
        bus.push_outbound(BusMessage::text(Channel::Telegram, "c", "occupying"))
            .await
            .unwrap();

        let consumer = {
            let bus = std::sync::Arc::clone(&bus);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                bus.pop_outbound(Some(Duration::from_secs(5))).await.unwrap()
            })
        };

        bus.push_outbound(BusMessage::text(Channel::Telegram, "c", "delayed final"))
            .await
            .unwrap();
        let first = consumer.await.unwrap();
        assert_eq!(first.content, "occupying");

        let second = bus
            .pop_outbound(Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(second.content, "delayed final");
    }

    #[tokio::test(start_paused = true)]
    async fn final_push_gives_up_after_max_attempts() {
        let bus = small_bus();
        bus.push_outbound(BusMessage::text(Channel::Telegram, "c", "stuck"))
            .await
            .unwrap();

        let err = bus
            .push_outbound(BusMessage::text(Channel::Telegram, "c", "never fits"))
            .await
            .unwrap_err();
        match err {
            BusError::QueueFull(msg) => assert_eq!(msg.content, "never fits"),
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }
}
