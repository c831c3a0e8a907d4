//! memtree - bounded, reconstructable conversation memory
//!
//! This crate provides:
//! - Conversation window holding the most recent K turns
//! - Summary merge stack compacting older windows into O(log N) nodes
//! - Memory coordinator with compaction, startup repair and lineage
//! - Store adapters (in-memory, redb) and LLM-backed summarizers

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod model;
pub mod store;
pub mod summarizer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types
pub use config::{EvictionPolicy, MemoryConfig, RetryConfig};
pub use error::{MemoryError, Result};
pub use memory::{
    CompactionReport, CompactionStatus, ConversationWindow, LeafPush, MemoryCoordinator,
    SummaryStack,
};
pub use model::{LeafRecord, NodeKind, Sender, SummaryNode, Turn};
pub use store::{InMemoryStore, RedbStore, Store, StoreOp};
pub use summarizer::{LlmSummarizer, ResilientSummarizer, Summarizer};
