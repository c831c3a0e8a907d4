//! Error types for conversation memory

use thiserror::Error;

/// Conversation memory error types
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Empty or missing input to a summarization call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Summarizer timeout or network failure. Safe to retry.
    #[error("Transient summarizer error: {0}")]
    TransientRemote(String),

    /// Summarizer answered but the output was unusable (empty, malformed, refused).
    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Persisted stack snapshot violates the consolidation invariant.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The leaf was committed but the merge pass that followed it failed.
    ///
    /// The leaf stays on the stack; the merge is retried by the next push or
    /// repair pass.
    #[error("Leaf {leaf_id} committed but merge deferred: {source}")]
    MergeDeferred {
        leaf_id: String,
        #[source]
        source: Box<MemoryError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    /// Whether the operation may succeed if attempted again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            MemoryError::TransientRemote(_) | MemoryError::Summarizer(_) => true,
            MemoryError::Persistence(_) => true,
            MemoryError::MergeDeferred { source, .. } => source.is_retryable(),
            MemoryError::Validation(_)
            | MemoryError::Consistency(_)
            | MemoryError::Config(_)
            | MemoryError::Json(_) => false,
        }
    }

    /// Whether the summarizer itself should be called again after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoryError::TransientRemote(_))
    }
}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        MemoryError::Persistence(format!("{err:#}"))
    }
}

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
