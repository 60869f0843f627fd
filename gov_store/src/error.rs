use thiserror::Error;

/// Errors raised by a coordination store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Coordination store connection failed: {0}")]
    Connection(String),

    #[error("Unexpected reply from coordination store: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
