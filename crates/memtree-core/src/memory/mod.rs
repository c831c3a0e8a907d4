//! Memory system for long-running conversations
//!
//! This module keeps conversation memory bounded while preserving the full
//! history:
//!
//! - **Conversation Window**: the most recent turns, verbatim, for prompt
//!   assembly (capacity K)
//! - **Summary Stack**: every older window compacted into a leaf summary and
//!   merged pairwise into a size-balanced tree (O(log N) live nodes)
//! - **Coordinator**: decides when to compact and recovers state at startup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Memory System Architecture                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Conversation Window (recent turns)                          │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │  VecDeque<Turn>, capacity K                            │ │
//! │  │  ↓ full → Summarizer::summarize → leaf (size 1)        │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! │                          ↓                                   │
//! │  Summary Stack (compacted history)                           │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │  [8] [4] [1]   sizes = binary digits of leaf count     │ │
//! │  │  ↓ equal top sizes → Summarizer::summarize_pair        │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! │                          ↓                                   │
//! │  Store (turns, nodes, stack pointers, source links)          │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod coordinator;
mod lineage;
mod stack;
mod window;

pub use coordinator::{CompactionReport, CompactionStatus, MemoryCoordinator};
pub use lineage::{TreeEntry, leaf_records, newest_leaf, walk_tree};
pub use stack::{LeafPush, SummaryStack, rollup, sort_stack};
pub use window::ConversationWindow;
