use thiserror::Error;

/// Capability failures. The display strings are user-visible: they are
/// embedded into the "操作失败：…" reply, so they stay in the product's
/// language.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    CapacityExhausted(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Device(String),

    #[error("执行超时")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ControlError>;
