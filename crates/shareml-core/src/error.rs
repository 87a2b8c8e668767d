//! Cross-cutting error taxonomy for the ML worker fabric.
//!
//! Every leaf crate (rate limiter, key pool, dispatcher, preflight,
//! contracts, store) defines its own narrow error type, then converts into
//! [`TaskError`] at the boundary the task runner sees. The runner never
//! matches on a leaf error type directly — it only needs to know which of
//! these closed kinds it got, because that's what decides ack vs. requeue.

use std::time::Duration;
use thiserror::Error;

/// The kinds of failure a job handler can report to the runner.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Envelope failed schema validation. Terminal; ack; no retry.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Content pre-flight rejected the input as "nothing to do" (not an
    /// error): all-URLs, spam, too short. Terminal success, not failure.
    #[error("preflight skipped: {0}")]
    PreflightSkipped(String),

    /// Estimated cost would breach the hourly/daily cap in strict mode.
    /// Terminal for this attempt; not counted as a provider failure.
    #[error("budget exceeded: {reason}")]
    BudgetExceeded {
        reason: String,
        hourly_used: f64,
        hourly_limit: f64,
        daily_used: f64,
        daily_limit: f64,
    },

    /// A rate-limit check was refused. Retry after `retry_after`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The shared rate-limit store's circuit breaker is open.
    #[error("rate limiter unavailable")]
    RateLimiterUnavailable,

    /// The local concurrency limiter had no free slot.
    #[error("concurrency exhausted, retry after {retry_after:?}")]
    ConcurrencyExhausted { retry_after: Duration },

    /// No API key in the pool was usable.
    #[error("key pool exhausted, retry after {retry_after:?}")]
    PoolExhausted { retry_after: Duration },

    /// Provider call failed in a way that should rotate keys and retry
    /// inside the dispatch loop (429-equivalent, 5xx-equivalent).
    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    /// Provider call failed in a way no retry will fix (malformed request).
    /// Terminal; ack; record failure with the message text.
    #[error("provider permanent error: {0}")]
    ProviderPermanent(String),

    /// The runner is about to hit the hard time limit for this task.
    #[error("soft time limit reached")]
    SoftTimeLimit,

    /// Result/cost store write failed. Task is requeued; cost-ledger
    /// write failures specifically are logged and suppressed by the
    /// caller rather than propagated (see `shareml-store`).
    #[error("storage error: {0}")]
    StorageError(String),
}

/// What the task runner should do in response to a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerAction {
    /// Ack the message; no retry; a failure result was (or should be) recorded.
    AckAsFailure,
    /// Ack the message; no failure recorded — preflight decided there was
    /// nothing to do.
    AckAsSkipped,
    /// Ask the broker to redeliver after the given countdown, bounded by
    /// the task's `max_retries`.
    Requeue(Duration),
}

impl TaskError {
    /// How the runner should react, per spec.md §7's propagation policy.
    pub fn runner_action(&self, default_backoff: Duration) -> RunnerAction {
        match self {
            TaskError::ContractViolation(_) => RunnerAction::AckAsFailure,
            TaskError::PreflightSkipped(_) => RunnerAction::AckAsSkipped,
            TaskError::BudgetExceeded { .. } => RunnerAction::AckAsFailure,
            TaskError::ProviderPermanent(_) => RunnerAction::AckAsFailure,
            TaskError::RateLimited { retry_after } => RunnerAction::Requeue(*retry_after),
            TaskError::ConcurrencyExhausted { retry_after } => {
                RunnerAction::Requeue(*retry_after)
            }
            TaskError::PoolExhausted { retry_after } => RunnerAction::Requeue(*retry_after),
            TaskError::RateLimiterUnavailable => RunnerAction::Requeue(default_backoff),
            TaskError::ProviderTransient(_) => RunnerAction::Requeue(default_backoff),
            TaskError::SoftTimeLimit => RunnerAction::Requeue(Duration::ZERO),
            TaskError::StorageError(_) => RunnerAction::Requeue(default_backoff),
        }
    }

    /// `true` for kinds that should never be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskError::ContractViolation(_)
                | TaskError::PreflightSkipped(_)
                | TaskError::BudgetExceeded { .. }
                | TaskError::ProviderPermanent(_)
        )
    }

    /// The `retry_after` the error carries, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TaskError::RateLimited { retry_after }
            | TaskError::ConcurrencyExhausted { retry_after }
            | TaskError::PoolExhausted { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// `true` if the runner should requeue rather than ack-as-final.
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }
}
