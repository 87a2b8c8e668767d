use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown task_type: {0}")]
    UnknownTaskType(String),

    #[error("invalid payload shape for {task_type}: {message}")]
    InvalidShape { task_type: String, message: String },

    #[error("batch embedding share_id must start with 'batch-', got: {0}")]
    InvalidBatchShareId(String),
}

impl From<ContractError> for shareml_core::TaskError {
    fn from(err: ContractError) -> Self {
        shareml_core::TaskError::ContractViolation(err.to_string())
    }
}
