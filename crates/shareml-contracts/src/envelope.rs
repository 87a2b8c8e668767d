//! Job envelope parsing: a loose `serde_json::Value` pass followed by a
//! shape validation pass keyed on `task_type`, matching how the original
//! `validators.py` parses first and validates second rather than leaning
//! on an adjacently-tagged enum (payload's shape depends on a sibling
//! field, which serde's tagging can't express directly).

use crate::error::ContractError;
use crate::payload::{
    BatchEmbeddingPayload, EmbeddingPayload, Payload, SummarizationPayload, TranscriptionPayload,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "summarize")]
    SummarizeLlm,
    #[serde(rename = "transcribe")]
    TranscribeWhisper,
    #[serde(rename = "embed")]
    EmbedVectors,
}

impl TaskType {
    fn parse(raw: &str) -> Result<Self, ContractError> {
        match raw {
            "summarize" => Ok(TaskType::SummarizeLlm),
            "transcribe" => Ok(TaskType::TranscribeWhisper),
            "embed" => Ok(TaskType::EmbedVectors),
            other => Err(ContractError::UnknownTaskType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(default)]
    pub traceparent: Option<String>,
    #[serde(default)]
    pub tracestate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub traceparent: Option<String>,
    #[serde(default)]
    pub tracestate: Option<String>,
}

impl JobMetadata {
    pub fn trace_context(&self) -> Option<TraceContext> {
        if self.traceparent.is_none() && self.tracestate.is_none() {
            return None;
        }
        Some(TraceContext {
            traceparent: self.traceparent.clone(),
            tracestate: self.tracestate.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    version: String,
    task_type: String,
    share_id: String,
    payload: serde_json::Value,
    metadata: JobMetadata,
}

#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub version: String,
    pub task_type: TaskType,
    pub share_id: String,
    pub payload: Payload,
    pub metadata: JobMetadata,
}

/// Parses and, when `validate` is true, validates `raw_json` against the
/// schema for its declared `task_type` (spec.md §4.I). When `validate` is
/// false the payload is kept as an opaque `Payload::Raw` value — a no-op
/// pass-through, not a relaxed validation.
pub fn parse_envelope(raw_json: &str, validate: bool) -> Result<JobEnvelope, ContractError> {
    let raw: RawEnvelope =
        serde_json::from_str(raw_json).map_err(|err| ContractError::Malformed(err.to_string()))?;

    if !validate {
        let task_type = TaskType::parse(&raw.task_type).unwrap_or(TaskType::SummarizeLlm);
        return Ok(JobEnvelope {
            version: raw.version,
            task_type,
            share_id: raw.share_id,
            payload: Payload::Raw(raw.payload),
            metadata: raw.metadata,
        });
    }

    let task_type = TaskType::parse(&raw.task_type)?;
    let payload = validate_payload(task_type, &raw.share_id, raw.payload)?;

    Ok(JobEnvelope {
        version: raw.version,
        task_type,
        share_id: raw.share_id,
        payload,
        metadata: raw.metadata,
    })
}

fn validate_payload(
    task_type: TaskType,
    share_id: &str,
    payload: serde_json::Value,
) -> Result<Payload, ContractError> {
    let shape_error = |err: serde_json::Error| ContractError::InvalidShape {
        task_type: format!("{task_type:?}"),
        message: err.to_string(),
    };

    match task_type {
        TaskType::TranscribeWhisper => {
            let parsed: TranscriptionPayload =
                serde_json::from_value(payload).map_err(shape_error)?;
            Ok(Payload::Transcribe(parsed))
        }
        TaskType::SummarizeLlm => {
            let parsed: SummarizationPayload =
                serde_json::from_value(payload).map_err(shape_error)?;
            Ok(Payload::Summarize(parsed))
        }
        TaskType::EmbedVectors => {
            let is_batch = payload
                .get("is_batch")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
                || payload.get("tasks").is_some();

            if is_batch {
                if !share_id.starts_with("batch-") {
                    return Err(ContractError::InvalidBatchShareId(share_id.to_string()));
                }
                let parsed: BatchEmbeddingPayload =
                    serde_json::from_value(payload).map_err(shape_error)?;
                Ok(Payload::BatchEmbed(parsed))
            } else {
                let parsed: EmbeddingPayload =
                    serde_json::from_value(payload).map_err(shape_error)?;
                Ok(Payload::Embed(parsed))
            }
        }
    }
}
