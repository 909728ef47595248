//! Error types for the retrieval substrate.

use thiserror::Error;

/// Errors from termbase / TM operations.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A vector had the wrong shape for the collection.
    #[error("bad vector: {0}")]
    BadVector(String),

    /// The input text is unusable (e.g. empty TM source).
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The embedding backend failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] lexmt_llm::ProviderError),

    /// Persistence I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be decoded.
    #[error("corrupt store: {0}")]
    CorruptStore(String),
}

/// Convenience alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

impl From<RetrievalError> for lexmt_types::PipelineError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InputInvalid(msg) => lexmt_types::PipelineError::InputInvalid(msg),
            RetrievalError::Embedding(inner) => inner.into(),
            RetrievalError::Io(inner) => lexmt_types::PipelineError::Io(inner),
            other => lexmt_types::PipelineError::UpstreamUnavailable(other.to_string()),
        }
    }
}
