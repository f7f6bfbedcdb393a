use thiserror::Error;

use crate::types::BusMessage;

#[derive(Debug, Error)]
pub enum BusError {
    /// The queue stayed full for the whole wait. The rejected message is
    /// handed back so the caller keeps ownership.
    #[error("queue full, message not enqueued")]
    QueueFull(Box<BusMessage>),

    #[error("timed out waiting for a message")]
    Timeout,

    /// The other end of the queue is gone (shutdown).
    #[error("message bus closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
