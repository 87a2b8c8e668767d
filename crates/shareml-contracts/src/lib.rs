//! Typed job envelope and per-task-type payload contracts validated ahead
//! of dispatch.

pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{parse_envelope, JobEnvelope, JobMetadata, TaskType, TraceContext};
pub use error::ContractError;
pub use payload::{
    BatchEmbeddingItem, BatchEmbeddingPayload, EmbeddingContent, EmbeddingOptions,
    EmbeddingPayload, Payload, SummarizationContent, SummarizationOptions, SummarizationPayload,
    TranscriptionContent, TranscriptionOptions, TranscriptionPayload,
};
