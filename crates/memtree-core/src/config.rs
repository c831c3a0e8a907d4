//! Memory configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

// Default configuration constants
const DEFAULT_WINDOW_CAPACITY: usize = 20;
const DEFAULT_SUMMARIZER_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const MIN_WINDOW_CAPACITY: usize = 1;
const MIN_TIMEOUT_SECONDS: u64 = 1;

/// What happens to a turn when it leaves the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Keep the raw turn, only drop it from the active window (auditable).
    #[default]
    Retain,
    /// Permanently delete the raw turn.
    Delete,
}

/// Exponential backoff for retryable summarizer failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Per-conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of turns the window holds before compaction (K).
    pub window_capacity: usize,
    pub eviction: EvictionPolicy,
    /// Per-call summarizer timeout; a timeout counts as a transient failure.
    pub summarizer_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Warn once the backlog of uncompacted turns reaches this size.
    /// `None` means twice the window capacity.
    pub backlog_warn_threshold: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            eviction: EvictionPolicy::default(),
            summarizer_timeout_secs: DEFAULT_SUMMARIZER_TIMEOUT_SECONDS,
            retry: RetryConfig::default(),
            backlog_warn_threshold: None,
        }
    }
}

impl MemoryConfig {
    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_summarizer_timeout_secs(mut self, secs: u64) -> Self {
        self.summarizer_timeout_secs = secs;
        self
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer_timeout_secs)
    }

    pub fn backlog_warn_threshold(&self) -> usize {
        self.backlog_warn_threshold
            .unwrap_or(self.window_capacity.saturating_mul(2))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.window_capacity < MIN_WINDOW_CAPACITY {
            return Err(MemoryError::Config(format!(
                "Window capacity must be at least {}",
                MIN_WINDOW_CAPACITY
            )));
        }

        if self.summarizer_timeout_secs < MIN_TIMEOUT_SECONDS {
            return Err(MemoryError::Config(format!(
                "Summarizer timeout must be at least {} second",
                MIN_TIMEOUT_SECONDS
            )));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(MemoryError::Config(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.backlog_warn_threshold == Some(0) {
            return Err(MemoryError::Config(
                "Backlog warning threshold must be at least 1".to_string(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(MemoryError::Config(
                "Initial retry delay cannot exceed the maximum delay".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_capacity, 20);
        assert_eq!(config.eviction, EvictionPolicy::Retain);
        assert_eq!(config.backlog_warn_threshold(), 40);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = MemoryConfig::default().with_window_capacity(0);
        assert!(matches!(config.validate(), Err(MemoryError::Config(_))));
    }

    #[test]
    fn test_delay_progression() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
        assert_eq!(config.delay_for(6), Duration::from_millis(5000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"window_capacity": 4, "eviction": "delete"}"#).unwrap();
        assert_eq!(config.window_capacity, 4);
        assert_eq!(config.eviction, EvictionPolicy::Delete);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.summarizer_timeout_secs, 60);
    }
}
