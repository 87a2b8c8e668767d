use thiserror::Error;

/// Errors surfaced by the key-value store backing the rate limiter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command failed: {0}")]
    Command(String),
}

/// Errors surfaced by [`crate::DistributedRateLimiter`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// A configured limit refused the request.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    Denied { retry_after_ms: u64 },

    /// The store's circuit breaker is open.
    #[error("rate limiter store unavailable")]
    Unavailable,
}

impl RateLimitError {
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            RateLimitError::Denied { retry_after_ms } => Some(*retry_after_ms),
            RateLimitError::Unavailable => None,
        }
    }
}

impl From<RateLimitError> for shareml_core::TaskError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Denied { retry_after_ms } => shareml_core::TaskError::RateLimited {
                retry_after: std::time::Duration::from_millis(retry_after_ms),
            },
            RateLimitError::Unavailable => shareml_core::TaskError::RateLimiterUnavailable,
        }
    }
}

/// Errors loading a [`crate::config::RateLimitConfig`] document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed rate limit config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown rate limit algorithm: {0}")]
    UnknownAlgorithm(String),
}
