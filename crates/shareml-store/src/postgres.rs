//! `sqlx`-backed Postgres implementation of [`crate::store::ResultStore`].
//! Embeddings use a real `pgvector` column in the target schema; here they
//! round-trip through `Vec<f32>` via `sqlx`'s array support.

use crate::budget::{evaluate, BudgetDecision, BudgetLimits};
use crate::error::StoreError;
use crate::models::{CostEntry, EmbeddingChunk, ResultRecord};
use crate::store::ResultStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert_result(&self, record: ResultRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO results (share_id, task_type, result_data, model_version, processing_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (share_id, task_type) DO UPDATE SET \
               result_data = EXCLUDED.result_data, \
               model_version = EXCLUDED.model_version, \
               processing_ms = EXCLUDED.processing_ms, \
               created_at = EXCLUDED.created_at",
        )
        .bind(&record.share_id)
        .bind(&record.task_type)
        .bind(&record.result_data)
        .bind(&record.model_version)
        .bind(record.processing_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(())
    }

    async fn get_result(
        &self,
        share_id: &str,
        task_type: &str,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT share_id, task_type, result_data, model_version, processing_ms, created_at \
             FROM results WHERE share_id = $1 AND task_type = $2",
        )
        .bind(share_id)
        .bind(task_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        Ok(row.map(|row| ResultRecord {
            share_id: row.get("share_id"),
            task_type: row.get("task_type"),
            result_data: row.get("result_data"),
            model_version: row.get("model_version"),
            processing_ms: row.get("processing_ms"),
            created_at: row.get("created_at"),
        }))
    }

    async fn append_cost(&self, entry: CostEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO costs (share_id, task_type, backend, provider, model, total_cost_usd, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.share_id)
        .bind(&entry.task_type)
        .bind(&entry.backend)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.total_cost_usd)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(())
    }

    async fn replace_embeddings(
        &self,
        share_id: &str,
        result: ResultRecord,
        chunks: Vec<EmbeddingChunk>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;

        sqlx::query(
            "INSERT INTO results (share_id, task_type, result_data, model_version, processing_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (share_id, task_type) DO UPDATE SET \
               result_data = EXCLUDED.result_data, \
               model_version = EXCLUDED.model_version, \
               processing_ms = EXCLUDED.processing_ms, \
               created_at = EXCLUDED.created_at",
        )
        .bind(&result.share_id)
        .bind(&result.task_type)
        .bind(&result.result_data)
        .bind(&result.model_version)
        .bind(result.processing_ms)
        .bind(result.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        sqlx::query("DELETE FROM embeddings WHERE share_id = $1")
            .bind(share_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::Query(err.to_string()))?;

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO embeddings (share_id, chunk_index, vector, model_version) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&chunk.share_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.vector)
            .bind(&chunk.model_version)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::Query(err.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Ok(())
    }

    async fn get_embeddings(&self, share_id: &str) -> Result<Vec<EmbeddingChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT share_id, chunk_index, vector, model_version FROM embeddings \
             WHERE share_id = $1 ORDER BY chunk_index",
        )
        .bind(share_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| EmbeddingChunk {
                share_id: row.get("share_id"),
                chunk_index: row.get("chunk_index"),
                vector: row.get("vector"),
                model_version: row.get("model_version"),
            })
            .collect())
    }

    async fn check_budget(
        &self,
        estimated_usd: f64,
        limits: &BudgetLimits,
    ) -> Result<BudgetDecision, StoreError> {
        let now = Utc::now();

        let hourly_row = sqlx::query(
            "SELECT COALESCE(SUM(total_cost_usd), 0.0) AS used FROM costs \
             WHERE backend = 'api' AND created_at >= $1",
        )
        .bind(now - chrono::Duration::hours(1))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        let daily_row = sqlx::query(
            "SELECT COALESCE(SUM(total_cost_usd), 0.0) AS used FROM costs \
             WHERE backend = 'api' AND created_at >= $1",
        )
        .bind(now - chrono::Duration::hours(24))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        let hourly_used: f64 = hourly_row.get("used");
        let daily_used: f64 = daily_row.get("used");

        Ok(evaluate(estimated_usd, hourly_used, daily_used, limits))
    }
}
