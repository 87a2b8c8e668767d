//! The `ResultStore` trait seam (spec.md §4.K) plus an in-memory
//! implementation used in tests and by callers that don't need durability.

use crate::budget::{evaluate, BudgetDecision, BudgetLimits};
use crate::error::StoreError;
use crate::models::{CostEntry, EmbeddingChunk, ResultRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Upsert on `(share_id, task_type)`: overwrites `result_data`,
    /// `model_version`, `processing_ms`, `created_at` on conflict.
    async fn upsert_result(&self, record: ResultRecord) -> Result<(), StoreError>;

    async fn get_result(
        &self,
        share_id: &str,
        task_type: &str,
    ) -> Result<Option<ResultRecord>, StoreError>;

    /// Append-only; never updates or deletes existing rows.
    async fn append_cost(&self, entry: CostEntry) -> Result<(), StoreError>;

    /// Replaces all chunks for `share_id` atomically (delete-then-insert
    /// in the same transaction as the `results` upsert, per spec.md §4.K).
    async fn replace_embeddings(
        &self,
        share_id: &str,
        result: ResultRecord,
        chunks: Vec<EmbeddingChunk>,
    ) -> Result<(), StoreError>;

    async fn get_embeddings(&self, share_id: &str) -> Result<Vec<EmbeddingChunk>, StoreError>;

    /// Sums `total_cost_usd` over the past 1h/24h, `backend='api'` only.
    async fn check_budget(
        &self,
        estimated_usd: f64,
        limits: &BudgetLimits,
    ) -> Result<BudgetDecision, StoreError>;
}

/// Fail-open wrapper around [`ResultStore::check_budget`]: a storage error
/// must never fail the task, since the budget check is an optimisation,
/// not the system of record (spec.md §4.K).
pub async fn check_budget_fail_open(
    store: &dyn ResultStore,
    estimated_usd: f64,
    limits: &BudgetLimits,
) -> BudgetDecision {
    match store.check_budget(estimated_usd, limits).await {
        Ok(decision) => decision,
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "budget check failed, failing open");
            #[cfg(not(feature = "tracing"))]
            let _ = err;
            BudgetDecision::fail_open("budget store unavailable")
        }
    }
}

#[derive(Default)]
struct Inner {
    results: HashMap<(String, String), ResultRecord>,
    costs: Vec<CostEntry>,
    embeddings: HashMap<String, Vec<EmbeddingChunk>>,
}

pub struct InMemoryResultStore {
    inner: Mutex<Inner>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn sum_costs_since(inner: &Inner, since: DateTime<Utc>) -> f64 {
        inner
            .costs
            .iter()
            .filter(|c| c.backend == "api" && c.created_at >= since)
            .map(|c| c.total_cost_usd)
            .sum()
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn upsert_result(&self, record: ResultRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .results
            .insert((record.share_id.clone(), record.task_type.clone()), record);
        Ok(())
    }

    async fn get_result(
        &self,
        share_id: &str,
        task_type: &str,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .results
            .get(&(share_id.to_string(), task_type.to_string()))
            .cloned())
    }

    async fn append_cost(&self, entry: CostEntry) -> Result<(), StoreError> {
        self.inner.lock().unwrap().costs.push(entry);
        Ok(())
    }

    async fn replace_embeddings(
        &self,
        share_id: &str,
        result: ResultRecord,
        chunks: Vec<EmbeddingChunk>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .results
            .insert((result.share_id.clone(), result.task_type.clone()), result);
        inner.embeddings.insert(share_id.to_string(), chunks);
        Ok(())
    }

    async fn get_embeddings(&self, share_id: &str) -> Result<Vec<EmbeddingChunk>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .embeddings
            .get(share_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_budget(
        &self,
        estimated_usd: f64,
        limits: &BudgetLimits,
    ) -> Result<BudgetDecision, StoreError> {
        let inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let hourly_used = Self::sum_costs_since(&inner, now - ChronoDuration::hours(1));
        let daily_used = Self::sum_costs_since(&inner, now - ChronoDuration::hours(24));
        Ok(evaluate(estimated_usd, hourly_used, daily_used, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(share_id: &str, task_type: &str, version: &str) -> ResultRecord {
        ResultRecord {
            share_id: share_id.to_string(),
            task_type: task_type.to_string(),
            result_data: serde_json::json!({"ok": true}),
            model_version: version.to_string(),
            processing_ms: 10,
            created_at: Utc::now(),
        }
    }

    fn cost(share_id: &str, backend: &str, amount: f64) -> CostEntry {
        CostEntry {
            share_id: share_id.to_string(),
            task_type: "summarize_llm".to_string(),
            backend: backend.to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            total_cost_usd: amount,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_result_for_same_key() {
        let store = InMemoryResultStore::new();
        store.upsert_result(result("s1", "summarize_llm", "v1")).await.unwrap();
        store.upsert_result(result("s1", "summarize_llm", "v2")).await.unwrap();

        let got = store.get_result("s1", "summarize_llm").await.unwrap().unwrap();
        assert_eq!(got.model_version, "v2");
    }

    #[tokio::test]
    async fn costs_are_append_only() {
        let store = InMemoryResultStore::new();
        store.append_cost(cost("s1", "api", 1.0)).await.unwrap();
        store.append_cost(cost("s1", "api", 2.0)).await.unwrap();
        assert_eq!(store.inner.lock().unwrap().costs.len(), 2);
    }

    #[tokio::test]
    async fn replace_embeddings_overwrites_all_chunks() {
        let store = InMemoryResultStore::new();
        let chunk = EmbeddingChunk {
            share_id: "s1".to_string(),
            chunk_index: 0,
            vector: vec![0.1, 0.2],
            model_version: "text-embedding-3-small".to_string(),
        };
        store
            .replace_embeddings("s1", result("s1", "embed_vectors", "v1"), vec![chunk.clone(), chunk.clone()])
            .await
            .unwrap();
        assert_eq!(store.get_embeddings("s1").await.unwrap().len(), 2);

        store
            .replace_embeddings("s1", result("s1", "embed_vectors", "v2"), vec![chunk])
            .await
            .unwrap();
        assert_eq!(store.get_embeddings("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_budget_only_counts_api_backend_costs() {
        let store = InMemoryResultStore::new();
        store.append_cost(cost("s1", "api", 5.0)).await.unwrap();
        store.append_cost(cost("s1", "local", 1000.0)).await.unwrap();

        let limits = BudgetLimits {
            hourly_limit_usd: 10.0,
            daily_limit_usd: 0.0,
            strict: true,
        };
        let decision = store.check_budget(4.0, &limits).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.hourly_used, 5.0);
    }

    struct FailingStore;

    #[async_trait]
    impl ResultStore for FailingStore {
        async fn upsert_result(&self, _record: ResultRecord) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_result(
            &self,
            _share_id: &str,
            _task_type: &str,
        ) -> Result<Option<ResultRecord>, StoreError> {
            Ok(None)
        }
        async fn append_cost(&self, _entry: CostEntry) -> Result<(), StoreError> {
            Ok(())
        }
        async fn replace_embeddings(
            &self,
            _share_id: &str,
            _result: ResultRecord,
            _chunks: Vec<EmbeddingChunk>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_embeddings(&self, _share_id: &str) -> Result<Vec<EmbeddingChunk>, StoreError> {
            Ok(Vec::new())
        }
        async fn check_budget(
            &self,
            _estimated_usd: f64,
            _limits: &BudgetLimits,
        ) -> Result<BudgetDecision, StoreError> {
            Err(StoreError::Connection("down".to_string()))
        }
    }

    #[tokio::test]
    async fn budget_check_fails_open_on_storage_error() {
        let store = FailingStore;
        let decision = check_budget_fail_open(&store, 1.0, &BudgetLimits::default()).await;
        assert!(decision.allowed);
    }
}
