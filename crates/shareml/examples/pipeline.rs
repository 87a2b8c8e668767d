//! Runs one summarization job through the full pipeline: contract parsing,
//! content preflight, a budget check, a fake provider dispatch, and result
//! storage.

use shareml::contracts::parse_envelope;
use shareml::dispatch::{
    ApiKey, ApiKeyPool, ConcurrencyLimiter, CostMultipliers, ProviderDispatcher, ProviderOutcome,
};
use shareml::preflight::PreflightConfig;
use shareml::ratelimit::{DistributedRateLimiter, InMemoryStore};
use shareml::store::{BudgetLimits, CostEntry, InMemoryResultStore, ResultRecord, ResultStore};
use shareml_runner::{process_delivery, Delivery, InMemoryBroker, RunnerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let raw = br#"{"version":"1.0","task_type":"summarize","share_id":"job-1","payload":{"content":{"text":"ShareML ingests a share and produces a short summary. This pipeline demonstrates every stage end to end with no external services required."}},"metadata":{"timestamp_ms":1700000000000}}"#;

    let broker = InMemoryBroker::new();
    let lock_store = InMemoryStore::new();
    let result_store = InMemoryResultStore::new();
    let preflight_config = PreflightConfig::defaults();
    let budget_limits = BudgetLimits::default();

    let rate_limiter = DistributedRateLimiter::new(
        Arc::new(InMemoryStore::new()),
        shareml::ratelimit::RateLimitConfigMap::load(
            "provider:\n  limits:\n    - algorithm: sliding_window\n      window_secs: 60\n      limit: 1000\n",
        )
        .unwrap(),
    );
    let pool = ApiKeyPool::new(vec![ApiKey::new("key-1", "secret-1")]);
    let dispatcher = ProviderDispatcher::new(
        pool,
        ConcurrencyLimiter::new(4),
        rate_limiter,
        CostMultipliers::default(),
    );

    let delivery = Delivery {
        body: raw.to_vec(),
        headers: Default::default(),
        tag: 1,
    };

    let outcome = process_delivery(
        &broker,
        "ml.summarize",
        &lock_store,
        delivery,
        &RunnerConfig::default(),
        |envelope, _signal| async move {
            let gated = shareml::composition::preflight_gate(&envelope.payload, &preflight_config)
                .map_err(|err| {
                    println!("preflight rejected the job: {err}");
                    err
                })?;
            let Some((text, truncated)) = gated else {
                return Ok(());
            };
            println!("preflight accepted {} chars (truncated: {truncated})", text.len());

            shareml::composition::budget_gate(&result_store, 0.002, &budget_limits).await?;

            let outcome = dispatcher
                .dispatch("job-1", "gpt-mini", 0.002, 64.0, |_key_id, _secret| async move {
                    Ok::<_, shareml::dispatch::ProviderCallError>(ProviderOutcome {
                        value: format!("summary of: {text}"),
                        actual_tokens: 58.0,
                    })
                })
                .await
                .map_err(|err| shareml::core::TaskError::ProviderTransient(err.to_string()))?;

            result_store
                .upsert_result(ResultRecord {
                    share_id: envelope.share_id.clone(),
                    task_type: "summarize_llm".into(),
                    result_data: serde_json::json!({ "summary": outcome }),
                    model_version: "gpt-mini".into(),
                    processing_ms: 42,
                    created_at: chrono::DateTime::from_timestamp(1_700_000_042, 0).unwrap(),
                })
                .await
                .map_err(shareml::core::TaskError::from)?;

            result_store
                .append_cost(CostEntry {
                    share_id: envelope.share_id.clone(),
                    task_type: "summarize_llm".into(),
                    backend: "api".into(),
                    provider: "openai".into(),
                    model: "gpt-mini".into(),
                    total_cost_usd: 0.002,
                    created_at: chrono::DateTime::from_timestamp(1_700_000_042, 0).unwrap(),
                })
                .await
                .map_err(shareml::core::TaskError::from)?;

            Ok(())
        },
    )
    .await
    .unwrap();

    println!("runner outcome: {outcome:?}");
}
