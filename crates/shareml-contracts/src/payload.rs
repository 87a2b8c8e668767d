//! Per-task-type payload shapes, mirroring the typed contract models kept
//! separately per task (spec.md §4.I), rather than one untyped blob.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionContent {
    pub media_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TranscriptionOptions {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionPayload {
    pub content: TranscriptionContent,
    #[serde(default)]
    pub options: Option<TranscriptionOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizationContent {
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SummarizationOptions {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizationPayload {
    pub content: SummarizationContent,
    #[serde(default)]
    pub options: Option<SummarizationOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingContent {
    pub text: String,
    #[serde(rename = "type")]
    pub content_kind: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingOptions {
    pub embedding_type: String,
    #[serde(default)]
    pub force_model: Option<String>,
    #[serde(default)]
    pub chunk_strategy: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingPayload {
    pub content: EmbeddingContent,
    #[serde(default)]
    pub options: Option<EmbeddingOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchEmbeddingItem {
    pub share_id: String,
    pub content: EmbeddingContent,
    #[serde(default)]
    pub options: Option<EmbeddingOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchEmbeddingPayload {
    pub tasks: Vec<BatchEmbeddingItem>,
    #[serde(default = "default_true")]
    pub is_batch: bool,
}

fn default_true() -> bool {
    true
}

/// The validated, task-type-specific shape of a [`crate::envelope::JobEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Transcribe(TranscriptionPayload),
    Summarize(SummarizationPayload),
    Embed(EmbeddingPayload),
    BatchEmbed(BatchEmbeddingPayload),
    /// Validation was disabled; the raw, unvalidated payload is kept as-is.
    Raw(serde_json::Value),
}
