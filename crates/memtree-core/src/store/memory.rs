//! In-memory store.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::{Store, StoreOp};
use crate::error::{MemoryError, Result};
use crate::model::{NodeKind, SummaryNode, Turn};

#[derive(Debug, Default)]
struct Inner {
    turns: HashMap<String, Turn>,
    /// chat_id -> turn ids in arrival order
    chat_turns: HashMap<String, Vec<String>>,
    active: HashSet<String>,
    nodes: HashMap<String, SummaryNode>,
    /// chat_id -> node ids in creation order
    chat_nodes: HashMap<String, Vec<String>>,
    /// chat_id -> live node ids in push order
    live: HashMap<String, Vec<String>>,
    sources: HashMap<String, Vec<String>>,
    counters: HashMap<(String, NodeKind), u64>,
}

/// Inverse of one applied op, used to roll back a failed transaction.
#[derive(Debug)]
enum Undo {
    CreateNode {
        node_id: String,
        chat_id: String,
        kind: NodeKind,
        previous_counter: Option<u64>,
    },
    LinkSources {
        summary_id: String,
        previous_len: Option<usize>,
    },
    Push {
        chat_id: String,
    },
    Pop {
        chat_id: String,
        position: usize,
        node_id: String,
    },
}

impl Inner {
    fn apply(&mut self, op: StoreOp) -> Result<Undo> {
        match op {
            StoreOp::CreateSummaryNode(node) => {
                if self.nodes.contains_key(&node.id) {
                    return Err(MemoryError::Persistence(format!(
                        "Summary node {} already exists",
                        node.id
                    )));
                }
                let key = (node.chat_id.clone(), node.kind);
                let previous_counter = self.counters.get(&key).copied();
                self.counters
                    .insert(key, previous_counter.unwrap_or(0).max(node.index + 1));
                self.chat_nodes
                    .entry(node.chat_id.clone())
                    .or_default()
                    .push(node.id.clone());
                let undo = Undo::CreateNode {
                    node_id: node.id.clone(),
                    chat_id: node.chat_id.clone(),
                    kind: node.kind,
                    previous_counter,
                };
                self.nodes.insert(node.id.clone(), node);
                Ok(undo)
            }
            StoreOp::LinkSourceTurns {
                summary_id,
                turn_ids,
            } => {
                let previous_len = self.sources.get(&summary_id).map(Vec::len);
                self.sources
                    .entry(summary_id.clone())
                    .or_default()
                    .extend(turn_ids);
                Ok(Undo::LinkSources {
                    summary_id,
                    previous_len,
                })
            }
            StoreOp::PushStack { chat_id, node_id } => {
                if !self.nodes.contains_key(&node_id) {
                    return Err(MemoryError::Persistence(format!(
                        "Cannot push unknown summary node {}",
                        node_id
                    )));
                }
                self.live.entry(chat_id.clone()).or_default().push(node_id);
                Ok(Undo::Push { chat_id })
            }
            StoreOp::PopStack { chat_id, node_id } => {
                let position = self
                    .live
                    .get(&chat_id)
                    .and_then(|live| live.iter().position(|id| *id == node_id));
                let (Some(position), Some(live)) = (position, self.live.get_mut(&chat_id)) else {
                    return Err(MemoryError::Persistence(format!(
                        "Summary node {} is not on the live stack",
                        node_id
                    )));
                };
                live.remove(position);
                Ok(Undo::Pop {
                    chat_id,
                    position,
                    node_id,
                })
            }
        }
    }

    fn rollback(&mut self, undo: Undo) {
        match undo {
            Undo::CreateNode {
                node_id,
                chat_id,
                kind,
                previous_counter,
            } => {
                self.nodes.remove(&node_id);
                if let Some(ids) = self.chat_nodes.get_mut(&chat_id) {
                    ids.pop();
                }
                match previous_counter {
                    Some(counter) => {
                        self.counters.insert((chat_id, kind), counter);
                    }
                    None => {
                        self.counters.remove(&(chat_id, kind));
                    }
                }
            }
            Undo::LinkSources {
                summary_id,
                previous_len,
            } => match previous_len {
                Some(len) => {
                    if let Some(ids) = self.sources.get_mut(&summary_id) {
                        ids.truncate(len);
                    }
                }
                None => {
                    self.sources.remove(&summary_id);
                }
            },
            Undo::Push { chat_id } => {
                if let Some(live) = self.live.get_mut(&chat_id) {
                    live.pop();
                }
            }
            Undo::Pop {
                chat_id,
                position,
                node_id,
            } => {
                self.live
                    .entry(chat_id)
                    .or_default()
                    .insert(position, node_id);
            }
        }
    }
}

/// Store backed by process memory.
///
/// Useful for tests and short-lived sessions. Transaction ops are applied in
/// place; if one fails, the ops already applied are undone in reverse order.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the turn is still held by a window.
    pub fn is_turn_active(&self, turn_id: &str) -> bool {
        self.inner.lock().active.contains(turn_id)
    }

    /// Number of summary nodes ever created for a chat.
    pub fn node_count(&self, chat_id: &str) -> usize {
        self.inner
            .lock()
            .chat_nodes
            .get(chat_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Store for InMemoryStore {
    fn append_turn(&self, turn: &Turn) -> Result<Turn> {
        let mut inner = self.inner.lock();
        if inner.turns.contains_key(&turn.id) {
            return Err(MemoryError::Persistence(format!(
                "Turn {} already exists",
                turn.id
            )));
        }
        inner
            .chat_turns
            .entry(turn.chat_id.clone())
            .or_default()
            .push(turn.id.clone());
        inner.active.insert(turn.id.clone());
        inner.turns.insert(turn.id.clone(), turn.clone());
        Ok(turn.clone())
    }

    fn mark_turn_evicted(&self, turn_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.turns.contains_key(turn_id) {
            return Err(MemoryError::Persistence(format!(
                "Turn {} not found",
                turn_id
            )));
        }
        inner.active.remove(turn_id);
        Ok(())
    }

    fn delete_turn(&self, turn_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(turn) = inner.turns.remove(turn_id) {
            if let Some(ids) = inner.chat_turns.get_mut(&turn.chat_id) {
                ids.retain(|id| id != turn_id);
            }
        }
        inner.active.remove(turn_id);
        Ok(())
    }

    fn load_recent_turns(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.chat_turns.get(chat_id) else {
            return Ok(Vec::new());
        };
        let mut turns: Vec<Turn> = ids
            .iter()
            .rev()
            .filter(|id| inner.active.contains(*id))
            .take(limit)
            .filter_map(|id| inner.turns.get(id).cloned())
            .collect();
        turns.reverse();
        Ok(turns)
    }

    fn load_all_turns(&self, chat_id: &str) -> Result<Vec<Turn>> {
        let inner = self.inner.lock();
        Ok(inner
            .chat_turns
            .get(chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.turns.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load_turns(&self, turn_ids: &[String]) -> Result<Vec<Turn>> {
        let inner = self.inner.lock();
        Ok(turn_ids
            .iter()
            .filter_map(|id| inner.turns.get(id).cloned())
            .collect())
    }

    fn load_stack_snapshot(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        let inner = self.inner.lock();
        Ok(inner
            .live
            .get(chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.nodes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load_all_nodes(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        let inner = self.inner.lock();
        Ok(inner
            .chat_nodes
            .get(chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.nodes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load_node(&self, node_id: &str) -> Result<Option<SummaryNode>> {
        Ok(self.inner.lock().nodes.get(node_id).cloned())
    }

    fn source_turn_ids(&self, summary_id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sources
            .get(summary_id)
            .cloned()
            .unwrap_or_default())
    }

    fn next_index(&self, chat_id: &str, kind: NodeKind) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .counters
            .get(&(chat_id.to_string(), kind))
            .copied()
            .unwrap_or(0))
    }

    fn run_transaction(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            match inner.apply(op) {
                Ok(undo) => applied.push(undo),
                Err(err) => {
                    while let Some(undo) = applied.pop() {
                        inner.rollback(undo);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}
