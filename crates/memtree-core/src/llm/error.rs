//! Error types for LLM clients

use thiserror::Error;

/// LLM client error types
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM HTTP error from {provider} (status {status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("LLM request timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

impl LlmError {
    /// Whether the request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::LlmHttp { status, .. } => matches!(status, 408 | 429 | 500..=599),
            LlmError::Timeout(_) => true,
            LlmError::Llm(message) => {
                let message = message.to_lowercase();
                ["rate limit", "timeout", "timed out", "overloaded", "connection"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
            LlmError::InvalidFormat(_) => false,
        }
    }
}

/// Result type alias for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;
