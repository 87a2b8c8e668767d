use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("storage query error: {0}")]
    Query(String),
}

impl From<StoreError> for shareml_core::TaskError {
    fn from(err: StoreError) -> Self {
        shareml_core::TaskError::StorageError(err.to_string())
    }
}
