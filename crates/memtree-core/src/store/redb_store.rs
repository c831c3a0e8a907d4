//! Store adapter over the redb-backed `memtree-storage` crate.
//!
//! Translates typed turns and summary nodes to the storage crate's byte-level
//! API (JSON payloads) and maps storage failures to
//! [`MemoryError::Persistence`].

use std::path::Path;

use memtree_storage::{Storage, SummaryWrite};
use serde::de::DeserializeOwned;

use super::{Store, StoreOp};
use crate::error::{MemoryError, Result};
use crate::model::{NodeKind, SummaryNode, Turn};

/// Durable store on an embedded redb database.
#[derive(Clone)]
pub struct RedbStore {
    storage: Storage,
}

impl RedbStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Storage::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Storage::in_memory()?))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether the turn is still held by a window.
    pub fn is_turn_active(&self, turn_id: &str) -> Result<bool> {
        Ok(self.storage.turns.is_active(turn_id)?)
    }

    fn to_write(op: StoreOp) -> Result<SummaryWrite> {
        Ok(match op {
            StoreOp::CreateSummaryNode(node) => SummaryWrite::PutNode {
                data: serde_json::to_vec(&node)?,
                node_id: node.id,
                chat_id: node.chat_id,
                kind: node.kind.as_str().to_string(),
                index: node.index,
            },
            StoreOp::LinkSourceTurns {
                summary_id,
                turn_ids,
            } => SummaryWrite::LinkSources {
                summary_id,
                turn_ids,
            },
            StoreOp::PushStack { chat_id, node_id } => SummaryWrite::Activate { chat_id, node_id },
            StoreOp::PopStack { chat_id, node_id } => SummaryWrite::Retire { chat_id, node_id },
        })
    }
}

fn decode_all<T: DeserializeOwned>(rows: Vec<(String, Vec<u8>)>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|(_, data)| serde_json::from_slice(&data).map_err(MemoryError::from))
        .collect()
}

impl Store for RedbStore {
    fn append_turn(&self, turn: &Turn) -> Result<Turn> {
        let data = serde_json::to_vec(turn)?;
        self.storage
            .turns
            .append_raw(&turn.id, &turn.chat_id, &data)?;
        Ok(turn.clone())
    }

    fn mark_turn_evicted(&self, turn_id: &str) -> Result<()> {
        self.storage.turns.mark_evicted(turn_id)?;
        Ok(())
    }

    fn delete_turn(&self, turn_id: &str) -> Result<()> {
        self.storage.turns.delete(turn_id)?;
        Ok(())
    }

    fn load_recent_turns(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>> {
        decode_all(self.storage.turns.list_active_raw(chat_id, limit)?)
    }

    fn load_all_turns(&self, chat_id: &str) -> Result<Vec<Turn>> {
        decode_all(self.storage.turns.list_all_raw(chat_id)?)
    }

    fn load_turns(&self, turn_ids: &[String]) -> Result<Vec<Turn>> {
        decode_all(self.storage.turns.get_many_raw(turn_ids)?)
    }

    fn load_stack_snapshot(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        decode_all(self.storage.summaries.list_live_raw(chat_id)?)
    }

    fn load_all_nodes(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        decode_all(self.storage.summaries.list_nodes_raw(chat_id)?)
    }

    fn load_node(&self, node_id: &str) -> Result<Option<SummaryNode>> {
        match self.storage.summaries.get_node_raw(node_id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn source_turn_ids(&self, summary_id: &str) -> Result<Vec<String>> {
        Ok(self.storage.summaries.source_turn_ids(summary_id)?)
    }

    fn next_index(&self, chat_id: &str, kind: NodeKind) -> Result<u64> {
        Ok(self.storage.summaries.next_index(chat_id, kind.as_str())?)
    }

    fn run_transaction(&self, ops: Vec<StoreOp>) -> Result<()> {
        let writes = ops
            .into_iter()
            .map(Self::to_write)
            .collect::<Result<Vec<_>>>()?;
        self.storage.summaries.apply(&writes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_round_trip_through_storage() {
        let store = RedbStore::in_memory().unwrap();
        let first = Turn::user("chat", "hello").with_id("t1");
        let second = Turn::system("chat", "hi there").with_id("t2");
        store.append_turn(&first).unwrap();
        store.append_turn(&second).unwrap();

        store.mark_turn_evicted("t1").unwrap();

        assert_eq!(store.load_recent_turns("chat", 10).unwrap(), vec![second.clone()]);
        assert_eq!(store.load_all_turns("chat").unwrap(), vec![first, second]);
        assert!(!store.is_turn_active("t1").unwrap());
    }

    #[test]
    fn test_merge_transaction_updates_live_stack() {
        let store = RedbStore::in_memory().unwrap();
        let older = SummaryNode::leaf("chat", 0, "first");
        let newer = SummaryNode::leaf("chat", 1, "second");
        for leaf in [&older, &newer] {
            store
                .run_transaction(vec![
                    StoreOp::CreateSummaryNode(leaf.clone()),
                    StoreOp::PushStack {
                        chat_id: "chat".to_string(),
                        node_id: leaf.id.clone(),
                    },
                ])
                .unwrap();
        }

        let parent = SummaryNode::merged(&older, &newer, 0, "both");
        store
            .run_transaction(vec![
                StoreOp::CreateSummaryNode(parent.clone()),
                StoreOp::PopStack {
                    chat_id: "chat".to_string(),
                    node_id: older.id.clone(),
                },
                StoreOp::PopStack {
                    chat_id: "chat".to_string(),
                    node_id: newer.id.clone(),
                },
                StoreOp::PushStack {
                    chat_id: "chat".to_string(),
                    node_id: parent.id.clone(),
                },
            ])
            .unwrap();

        assert_eq!(store.load_stack_snapshot("chat").unwrap(), vec![parent.clone()]);
        assert_eq!(store.load_all_nodes("chat").unwrap().len(), 3);
        assert_eq!(store.load_node(&parent.id).unwrap(), Some(parent));
        assert_eq!(store.next_index("chat", NodeKind::Leaf).unwrap(), 2);
        assert_eq!(store.next_index("chat", NodeKind::Node).unwrap(), 1);
    }

    #[test]
    fn test_storage_failure_maps_to_persistence() {
        let store = RedbStore::in_memory().unwrap();
        let err = store.mark_turn_evicted("missing").unwrap_err();
        assert!(matches!(err, MemoryError::Persistence(_)));
    }
}
