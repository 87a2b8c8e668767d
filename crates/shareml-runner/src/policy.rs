//! Retry-vs-ack decision table: how many times a transient failure may be
//! requeued before the runner gives up and acks as a failure (spec.md
//! §4.L).

use shareml_core::{RunnerAction, TaskError};
use std::time::Duration;

/// `max_retries` per task, default 3; summarize gets 5 when the failure
/// cause is a rate limit (spec.md §4.L).
pub fn max_retries(task_type: &str, error: &TaskError) -> u32 {
    let is_rate_limit_cause = matches!(
        error,
        TaskError::RateLimited { .. } | TaskError::RateLimiterUnavailable
    );

    if task_type == "summarize_llm" && is_rate_limit_cause {
        5
    } else {
        3
    }
}

/// What the runner should do with a delivery that produced `error`, given
/// how many times it has already been retried.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AckAsFailure,
    AckAsSkipped,
    Requeue { countdown: Duration },
}

pub fn decide(
    task_type: &str,
    error: &TaskError,
    retry_count: u32,
    default_backoff: Duration,
) -> Decision {
    match error.runner_action(default_backoff) {
        RunnerAction::AckAsFailure => Decision::AckAsFailure,
        RunnerAction::AckAsSkipped => Decision::AckAsSkipped,
        RunnerAction::Requeue(countdown) => {
            if retry_count >= max_retries(task_type, error) {
                Decision::AckAsFailure
            } else {
                Decision::Requeue { countdown }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_gets_five_retries_for_rate_limit_cause() {
        let err = TaskError::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(max_retries("summarize_llm", &err), 5);
    }

    #[test]
    fn other_task_types_get_three_retries_even_for_rate_limit() {
        let err = TaskError::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(max_retries("embed_vectors", &err), 3);
    }

    #[test]
    fn transient_error_requeues_until_retry_cap_then_acks_as_failure() {
        let err = TaskError::ProviderTransient("boom".into());
        let default_backoff = Duration::from_secs(1);

        assert_eq!(
            decide("embed_vectors", &err, 2, default_backoff),
            Decision::Requeue { countdown: default_backoff }
        );
        assert_eq!(
            decide("embed_vectors", &err, 3, default_backoff),
            Decision::AckAsFailure
        );
    }

    #[test]
    fn contract_violation_always_acks_as_failure_regardless_of_retry_count() {
        let err = TaskError::ContractViolation("bad shape".into());
        assert_eq!(
            decide("summarize_llm", &err, 0, Duration::from_secs(1)),
            Decision::AckAsFailure
        );
    }

    #[test]
    fn preflight_skip_always_acks_as_skipped() {
        let err = TaskError::PreflightSkipped("all urls".into());
        assert_eq!(
            decide("summarize_llm", &err, 0, Duration::from_secs(1)),
            Decision::AckAsSkipped
        );
    }
}
