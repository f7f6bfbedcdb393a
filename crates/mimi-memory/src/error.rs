use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("long-term memory too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, MemoryError>;
