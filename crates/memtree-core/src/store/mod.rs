//! Persistence capability consumed by the window and the summary stack.
//!
//! The core never talks to a database directly. It receives a [`Store`] at
//! construction and expresses every multi-write step (a summary node, its
//! stack-pointer changes and its source-turn links) as one
//! [`Store::run_transaction`] call.

mod memory;
mod redb_store;

pub use memory::InMemoryStore;
pub use redb_store::RedbStore;

use crate::error::Result;
use crate::model::{NodeKind, SummaryNode, Turn};

/// One write of an atomic store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Persist a new, immutable summary node.
    CreateSummaryNode(SummaryNode),
    /// Record the raw turns a leaf was produced from.
    LinkSourceTurns {
        summary_id: String,
        turn_ids: Vec<String>,
    },
    /// Put a persisted node on the chat's live stack.
    PushStack { chat_id: String, node_id: String },
    /// Take a node off the chat's live stack. Fails if it is not live.
    PopStack { chat_id: String, node_id: String },
}

/// Durable storage for turns and summary nodes.
pub trait Store: Send + Sync {
    /// Persist a new raw turn; it starts out held by the window.
    fn append_turn(&self, turn: &Turn) -> Result<Turn>;

    /// Drop a turn from the active window but keep it for audit.
    fn mark_turn_evicted(&self, turn_id: &str) -> Result<()>;

    /// Permanently delete a turn.
    fn delete_turn(&self, turn_id: &str) -> Result<()>;

    /// The most recent `limit` turns still held by a window, oldest first.
    fn load_recent_turns(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Every stored turn of a chat in arrival order, evicted ones included.
    fn load_all_turns(&self, chat_id: &str) -> Result<Vec<Turn>>;

    /// Load turns by id, skipping ids that no longer exist.
    fn load_turns(&self, turn_ids: &[String]) -> Result<Vec<Turn>>;

    /// Live stack members of a chat, in no particular order.
    fn load_stack_snapshot(&self, chat_id: &str) -> Result<Vec<SummaryNode>>;

    /// Every node ever created for a chat, in no particular order.
    fn load_all_nodes(&self, chat_id: &str) -> Result<Vec<SummaryNode>>;

    fn load_node(&self, node_id: &str) -> Result<Option<SummaryNode>>;

    /// Turn ids linked to a leaf, in window order.
    fn source_turn_ids(&self, summary_id: &str) -> Result<Vec<String>>;

    /// 0 if no node of this kind exists for the chat, else max index + 1.
    fn next_index(&self, chat_id: &str, kind: NodeKind) -> Result<u64>;

    /// Apply every op or none of them.
    fn run_transaction(&self, ops: Vec<StoreOp>) -> Result<()>;

    fn create_summary_node(&self, node: &SummaryNode) -> Result<SummaryNode> {
        self.run_transaction(vec![StoreOp::CreateSummaryNode(node.clone())])?;
        Ok(node.clone())
    }

    fn link_source_turns(&self, summary_id: &str, turn_ids: &[String]) -> Result<()> {
        self.run_transaction(vec![StoreOp::LinkSourceTurns {
            summary_id: summary_id.to_string(),
            turn_ids: turn_ids.to_vec(),
        }])
    }
}
