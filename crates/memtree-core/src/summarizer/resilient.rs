//! Timeout and retry decorator for summarizers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::Summarizer;
use crate::config::RetryConfig;
use crate::error::{MemoryError, Result};

/// Wraps a summarizer with a per-call timeout and exponential backoff.
///
/// A timeout is reported as [`MemoryError::TransientRemote`], exactly like a
/// network failure. Only transient errors are retried; validation and
/// malformed-output errors are returned immediately.
pub struct ResilientSummarizer {
    inner: Arc<dyn Summarizer>,
    timeout: Duration,
    retry: RetryConfig,
}

impl ResilientSummarizer {
    pub fn new(inner: Arc<dyn Summarizer>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            inner,
            timeout,
            retry,
        }
    }

    async fn with_retry<F, Fut>(&self, operation: &str, call: F) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<String>> + Send,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(MemoryError::TransientRemote(format!(
                    "{operation} timed out after {} ms",
                    self.timeout.as_millis()
                ))),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Summarizer call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Summarizer for ResilientSummarizer {
    async fn summarize(&self, prompt_text: &str) -> Result<String> {
        self.with_retry("summarize", || self.inner.summarize(prompt_text))
            .await
    }

    async fn summarize_pair(&self, older: &str, newer: &str) -> Result<String> {
        self.with_retry("summarize_pair", || self.inner.summarize_pair(older, newer))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, ScriptedSummarizer};

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(ScriptedSummarizer::new());
        inner.fail_summarize_call(1, Failure::Transient);
        inner.fail_summarize_call(2, Failure::Transient);
        let summarizer =
            ResilientSummarizer::new(inner.clone(), Duration::from_secs(5), retry(3));

        let summary = summarizer.summarize("User: hi").await.unwrap();
        assert_eq!(summary, "S(User: hi)");
        assert_eq!(inner.summarize_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let inner = Arc::new(ScriptedSummarizer::new());
        for call in 1..=5 {
            inner.fail_pair_call(call, Failure::Transient);
        }
        let summarizer =
            ResilientSummarizer::new(inner.clone(), Duration::from_secs(5), retry(2));

        let err = summarizer.summarize_pair("a", "b").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(inner.pair_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_is_not_retried() {
        let inner = Arc::new(ScriptedSummarizer::new());
        inner.fail_summarize_call(1, Failure::Malformed);
        let summarizer =
            ResilientSummarizer::new(inner.clone(), Duration::from_secs(5), retry(3));

        assert!(matches!(
            summarizer.summarize("User: hi").await,
            Err(MemoryError::Summarizer(_))
        ));
        assert_eq!(inner.summarize_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let inner = Arc::new(ScriptedSummarizer::new().with_delay(Duration::from_secs(30)));
        let summarizer =
            ResilientSummarizer::new(inner.clone(), Duration::from_secs(1), RetryConfig::none());

        let err = summarizer.summarize("User: hi").await.unwrap_err();
        assert!(matches!(err, MemoryError::TransientRemote(ref msg) if msg.contains("timed out")));
    }
}
