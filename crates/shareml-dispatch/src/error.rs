use std::time::Duration;
use thiserror::Error;

/// Error reported by the caller-supplied provider call closure.
#[derive(Debug, Clone)]
pub enum ProviderCallError {
    /// The SDK signalled a rate limit (HTTP 429 or equivalent).
    RateLimited { retry_after_ms: u64 },
    /// Transient failure matching a 5xx-style pattern; worth retrying with
    /// a different key.
    Transient(String),
    /// Non-retriable failure (malformed request, auth rejected outright).
    Permanent(String),
}

/// Errors surfaced by [`crate::dispatcher::ProviderDispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("concurrency limit exhausted")]
    ConcurrencyExhausted { retry_after: Duration },

    #[error("no usable api key in pool")]
    PoolExhausted { retry_after: Duration },

    #[error("rate limited")]
    RateLimited { retry_after: Duration },

    #[error("rate limiter unavailable")]
    RateLimiterUnavailable,

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("provider permanent error: {0}")]
    ProviderPermanent(String),
}

impl From<DispatchError> for shareml_core::TaskError {
    fn from(err: DispatchError) -> Self {
        use shareml_core::TaskError;
        match err {
            DispatchError::ConcurrencyExhausted { retry_after } => {
                TaskError::ConcurrencyExhausted { retry_after }
            }
            DispatchError::PoolExhausted { retry_after } => TaskError::PoolExhausted { retry_after },
            DispatchError::RateLimited { retry_after } => TaskError::RateLimited { retry_after },
            DispatchError::RateLimiterUnavailable => TaskError::RateLimiterUnavailable,
            DispatchError::ProviderTransient(msg) => TaskError::ProviderTransient(msg),
            DispatchError::ProviderPermanent(msg) => TaskError::ProviderPermanent(msg),
        }
    }
}
