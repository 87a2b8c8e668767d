//! Soft/hard per-task-type time limits (spec.md §5). The handler gets a
//! cooperative signal for the soft deadline so it can save partial work
//! (e.g. merged transcript segments) before the hard deadline cancels it.

use shareml_core::TaskError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn soft_limit(task_type: &str) -> Duration {
    match task_type {
        "transcribe_whisper" => Duration::from_secs(840),
        "embed_vectors" => Duration::from_secs(300),
        _ => Duration::from_secs(270),
    }
}

pub fn hard_limit(task_type: &str) -> Duration {
    Duration::from_secs_f64(soft_limit(task_type).as_secs_f64() * 1.5)
}

#[derive(Clone)]
pub struct SoftTimeLimitSignal(Arc<AtomicBool>);

impl SoftTimeLimitSignal {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Runs `make_task(signal)` under the hard deadline for `task_type`,
/// flipping `signal` once the soft deadline passes without cancelling the
/// task — the handler decides what "surface partial work" means.
pub async fn run_with_time_budget<F, Fut, T>(task_type: &str, make_task: F) -> Result<T, TaskError>
where
    F: FnOnce(SoftTimeLimitSignal) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let signal = SoftTimeLimitSignal::new();
    let timer_signal = signal.clone();
    let soft = soft_limit(task_type);
    let hard = hard_limit(task_type);

    let timer = tokio::spawn(async move {
        tokio::time::sleep(soft).await;
        timer_signal.set();
    });

    let outcome = tokio::time::timeout(hard, make_task(signal)).await;
    timer.abort();

    match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(TaskError::SoftTimeLimit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_limit_is_one_and_a_half_times_soft() {
        assert_eq!(hard_limit("summarize_llm"), Duration::from_secs_f64(405.0));
        assert_eq!(hard_limit("transcribe_whisper"), Duration::from_secs_f64(1260.0));
        assert_eq!(hard_limit("embed_vectors"), Duration::from_secs_f64(450.0));
    }

    #[tokio::test]
    async fn completes_normally_within_budget() {
        let result = run_with_time_budget("summarize_llm", |_signal| async move { Ok::<_, TaskError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_signal_flips_before_hard_deadline_cancels() {
        let result = run_with_time_budget("embed_vectors", |signal| async move {
            tokio::time::sleep(Duration::from_secs(301)).await;
            assert!(signal.is_set());
            Ok::<_, TaskError>(())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn hard_deadline_surfaces_soft_time_limit_error() {
        let result = run_with_time_budget("embed_vectors", |_signal| async move {
            tokio::time::sleep(Duration::from_secs(10_000)).await;
            Ok::<_, TaskError>(())
        })
        .await;
        assert!(matches!(result, Err(TaskError::SoftTimeLimit)));
    }
}
