//! The per-message consume loop body (spec.md §4.L): trace extraction,
//! contract validation, singleton lock, handler dispatch under a time
//! budget, and the retry/ack decision.

use crate::broker::{Broker, BrokerError, Delivery};
use crate::policy::{self, Decision};
use crate::time_limit::{run_with_time_budget, SoftTimeLimitSignal};
use crate::trace::extract_trace_context;
use shareml_contracts::{parse_envelope, JobEnvelope, Payload, TaskType};
use shareml_core::TaskError;
use shareml_ratelimit::KvStore;
use std::future::Future;
use std::time::Duration;

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_backoff: Duration,
    pub validate_contracts: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_backoff: Duration::from_secs(5),
            validate_contracts: true,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Processed,
    DuplicateDropped,
    Skipped,
    Failed,
    Requeued { countdown: Duration },
    MalformedEnvelope,
}

fn lock_task_type(envelope: &JobEnvelope) -> &'static str {
    match (envelope.task_type, &envelope.payload) {
        (TaskType::EmbedVectors, Payload::BatchEmbed(_)) => "batch_embed_vectors",
        (TaskType::EmbedVectors, _) => "embed_vectors",
        (TaskType::SummarizeLlm, _) => "summarize_llm",
        (TaskType::TranscribeWhisper, _) => "transcribe_whisper",
    }
}

fn retry_count(delivery: &Delivery, envelope: &JobEnvelope) -> u32 {
    let header_count = delivery
        .headers
        .get(RETRY_COUNT_HEADER)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    header_count.max(envelope.metadata.retry_count)
}

/// Processes one delivery against `handler`, which performs preflight,
/// budget check, dispatch, and persistence for the envelope it's handed.
pub async fn process_delivery<B, L, H, Fut>(
    broker: &B,
    queue: &str,
    lock_store: &L,
    delivery: Delivery,
    config: &RunnerConfig,
    handler: H,
) -> Result<Outcome, BrokerError>
where
    B: Broker,
    L: KvStore,
    H: FnOnce(JobEnvelope, SoftTimeLimitSignal) -> Fut,
    Fut: Future<Output = Result<(), TaskError>>,
{
    let (_traceparent, _tracestate) = extract_trace_context(&delivery.headers);

    let body_str = match std::str::from_utf8(&delivery.body) {
        Ok(s) => s,
        Err(_) => {
            broker.ack(queue, &delivery).await?;
            return Ok(Outcome::MalformedEnvelope);
        }
    };

    let envelope = match parse_envelope(body_str, config.validate_contracts) {
        Ok(envelope) => envelope,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "envelope failed contract validation");
            broker.ack(queue, &delivery).await?;
            return Ok(Outcome::MalformedEnvelope);
        }
    };

    let task_type = lock_task_type(&envelope);
    let share_id = envelope.share_id.clone();
    let count = retry_count(&delivery, &envelope);

    let acquired = shareml_store::lock::acquire(lock_store, task_type, &share_id)
        .await
        .unwrap_or(false);

    if !acquired {
        #[cfg(feature = "tracing")]
        tracing::info!(task_type, share_id, "duplicate submission, dropping");
        broker.ack(queue, &delivery).await?;
        return Ok(Outcome::DuplicateDropped);
    }

    let result = run_with_time_budget(task_type, |signal| handler(envelope, signal)).await;

    let _ = shareml_store::lock::release(lock_store, task_type, &share_id).await;

    match result {
        Ok(()) => {
            broker.ack(queue, &delivery).await?;
            Ok(Outcome::Processed)
        }
        Err(err) => match policy::decide(task_type, &err, count, config.default_backoff) {
            Decision::AckAsFailure => {
                broker.ack(queue, &delivery).await?;
                Ok(Outcome::Failed)
            }
            Decision::AckAsSkipped => {
                broker.ack(queue, &delivery).await?;
                Ok(Outcome::Skipped)
            }
            Decision::Requeue { countdown } => {
                let mut headers = delivery.headers.clone();
                headers.insert(RETRY_COUNT_HEADER.to_string(), (count + 1).to_string());
                broker
                    .nack_requeue(queue, &delivery, countdown, headers)
                    .await?;
                Ok(Outcome::Requeued { countdown })
            }
        },
    }
}
