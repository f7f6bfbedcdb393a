use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    /// No sink registered for the channel.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// The sink (or voice backend) reported a delivery failure.
    #[error("send failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, SendError>;
