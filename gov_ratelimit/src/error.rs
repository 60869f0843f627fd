use std::time::Duration;

use thiserror::Error;

/// Result type for rate limiting operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors surfaced to callers of the rate limiter
///
/// Coordination store failures never appear here: the limiter degrades open
/// instead and reports them through [`crate::StoreHealth`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// No slot freed up within the caller's budget
    #[error("Timed out after {timeout:?} waiting for a rate limit slot on {key}")]
    Timeout { key: String, timeout: Duration },

    /// Invalid configuration
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfig(&'static str),
}
