//! Row shapes for the three tables `ResultStore` owns (spec.md §4.K).

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub share_id: String,
    pub task_type: String,
    pub result_data: Value,
    pub model_version: String,
    pub processing_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// One row per provider call per share; one per chunk for chunked
/// transcriptions. Append-only — never updated or deleted by `upsert`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEntry {
    pub share_id: String,
    pub task_type: String,
    pub backend: String,
    pub provider: String,
    pub model: String,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingChunk {
    pub share_id: String,
    pub chunk_index: i32,
    pub vector: Vec<f32>,
    pub model_version: String,
}
