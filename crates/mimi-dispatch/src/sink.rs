use async_trait::async_trait;

use crate::error::Result;

/// Egress side of one channel (Telegram client, WS gateway, CLI stdout…).
///
/// `send` takes `&self` so a connected sink can deliver concurrently
/// without a mutable borrow.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Stable lowercase identifier, used in logs.
    fn name(&self) -> &str;

    /// Deliver one final or status text to the conversation `chat_id`.
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}
