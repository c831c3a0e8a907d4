//! Summarization capability injected into the memory coordinator.
//!
//! [`Summarizer`] is the only suspension point of the core. Implementations:
//!
//! - [`LlmSummarizer`]: prompts any [`LlmClient`](crate::llm::LlmClient)
//! - [`ResilientSummarizer`]: decorator adding a per-call timeout and
//!   exponential backoff for transient failures

mod llm;
mod resilient;

pub use llm::{LlmSummarizer, PAIR_PROMPT, WINDOW_PROMPT};
pub use resilient::ResilientSummarizer;

use async_trait::async_trait;

use crate::error::Result;

/// Turns conversation text into natural-language summaries.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condense one serialized window of turns.
    async fn summarize(&self, prompt_text: &str) -> Result<String>;

    /// Merge two adjacent summaries. `older` always precedes `newer`
    /// chronologically.
    async fn summarize_pair(&self, older: &str, newer: &str) -> Result<String>;
}
