use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("no schedule configured")]
    NotConfigured,

    #[error("store error: {0}")]
    Store(#[from] mimi_core::MimiError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
