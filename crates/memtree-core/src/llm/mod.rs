//! LLM module - model client abstraction used by the summarizer adapter
//!
//! Only the request/response surface the summarizer needs is modeled here;
//! provider wire protocols live with the concrete client implementations.

mod client;
mod error;
#[cfg(any(test, feature = "test-utils"))]
mod mock_client;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, TokenUsage,
};
pub use error::{LlmError, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use mock_client::{MockLlmClient, MockStep, MockStepKind};
