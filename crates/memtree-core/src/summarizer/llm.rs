//! Summarizer backed by an LLM client.

use std::sync::Arc;

use async_trait::async_trait;

use super::Summarizer;
use crate::error::{MemoryError, Result};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

pub const WINDOW_PROMPT: &str = include_str!("templates/window_prompt.md");
pub const PAIR_PROMPT: &str = include_str!("templates/pair_prompt.md");

const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 1_024;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Summarizer that prompts an [`LlmClient`].
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
    max_summary_tokens: u32,
    temperature: f32,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_max_summary_tokens(mut self, tokens: u32) -> Self {
        self.max_summary_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let request = CompletionRequest::new(vec![Message::user(prompt)])
            .with_max_tokens(self.max_summary_tokens)
            .with_temperature(self.temperature);

        let response = self.llm.complete(request).await.map_err(map_llm_error)?;
        let summary = response.content.unwrap_or_default().trim().to_string();
        if summary.is_empty() {
            return Err(MemoryError::Summarizer(format!(
                "{}/{} returned an empty summary",
                self.llm.provider(),
                self.llm.model()
            )));
        }
        Ok(summary)
    }
}

fn map_llm_error(err: LlmError) -> MemoryError {
    if err.is_retryable() {
        MemoryError::TransientRemote(err.to_string())
    } else {
        MemoryError::Summarizer(err.to_string())
    }
}

fn require_text(label: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(MemoryError::Validation(format!("{label} is empty")));
    }
    Ok(())
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, prompt_text: &str) -> Result<String> {
        require_text("Conversation text", prompt_text)?;
        let prompt = format!(
            "{}\n\n---\n\n## Conversation to Summarize\n\n{}",
            WINDOW_PROMPT, prompt_text
        );
        self.complete(prompt).await
    }

    async fn summarize_pair(&self, older: &str, newer: &str) -> Result<String> {
        require_text("Earlier summary", older)?;
        require_text("Later summary", newer)?;
        let prompt = format!(
            "{}\n\n---\n\n## Earlier Summary\n\n{}\n\n## Later Summary\n\n{}",
            PAIR_PROMPT, older, newer
        );
        self.complete(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockStep};

    fn summarizer(steps: Vec<MockStep>) -> (LlmSummarizer, MockLlmClient) {
        let client = MockLlmClient::from_steps("mock-model", steps);
        (LlmSummarizer::new(Arc::new(client.clone())), client)
    }

    #[tokio::test]
    async fn test_summarize_wraps_conversation_in_template() {
        let (summarizer, client) = summarizer(vec![MockStep::text("  The user likes tea.  ")]);

        let summary = summarizer.summarize("User: I like tea").await.unwrap();
        assert_eq!(summary, "The user likes tea.");

        let requests = client.requests().await;
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.starts_with(WINDOW_PROMPT));
        assert!(prompt.ends_with("User: I like tea"));
        assert_eq!(requests[0].max_tokens, Some(DEFAULT_MAX_SUMMARY_TOKENS));
    }

    #[tokio::test]
    async fn test_pair_prompt_keeps_older_first() {
        let (summarizer, client) = summarizer(vec![MockStep::text("merged")]);

        summarizer.summarize_pair("OLDER", "NEWER").await.unwrap();

        let prompt = client.requests().await[0].messages[0].content.clone();
        let older_at = prompt.find("OLDER").unwrap();
        let newer_at = prompt.find("NEWER").unwrap();
        assert!(older_at < newer_at);
    }

    #[tokio::test]
    async fn test_empty_input_is_validation_error() {
        let (summarizer, client) = summarizer(vec![]);

        assert!(matches!(
            summarizer.summarize("   ").await,
            Err(MemoryError::Validation(_))
        ));
        assert!(matches!(
            summarizer.summarize_pair("older", "").await,
            Err(MemoryError::Validation(_))
        ));
        assert!(client.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_output_is_summarizer_error() {
        let (summarizer, _) = summarizer(vec![MockStep::empty()]);
        assert!(matches!(
            summarizer.summarize("User: hi").await,
            Err(MemoryError::Summarizer(_))
        ));
    }

    #[tokio::test]
    async fn test_llm_errors_are_classified() {
        let (summarizer, _) = summarizer(vec![
            MockStep::timeout(0),
            MockStep::error("bad request"),
        ]);

        assert!(matches!(
            summarizer.summarize("User: hi").await,
            Err(MemoryError::TransientRemote(_))
        ));
        assert!(matches!(
            summarizer.summarize("User: hi").await,
            Err(MemoryError::Summarizer(_))
        ));
    }
}
