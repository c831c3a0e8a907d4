//! Summary storage - byte-level API for the summary merge tree.
//!
//! Summary nodes are immutable once written. The live stack of a chat is an
//! index over node ids; merges retire two live entries and activate their
//! parent. All writes go through [`SummaryStorage::apply`], which commits a
//! batch of [`SummaryWrite`] steps in a single redb write transaction, so a
//! node, its stack-pointer changes and its source-turn links land together
//! or not at all.
//!
//! # Tables
//!
//! - `summary_nodes`: node_id -> node_data
//! - `summary_chat_index`: chat_id:node_id -> node_id (every node of a chat)
//! - `summary_live_index`: chat_id:node_id -> node_id (live stack members)
//! - `summary_source_index`: summary_id:position -> turn_id
//! - `summary_index_counter`: chat_id:kind -> next index

use anyhow::{Result, bail};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::sync::Arc;

use crate::range_utils::{ensure_key_segment, prefix_range, seq_key};

const NODE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("summary_nodes");
/// Index: chat_id:node_id -> node_id
const CHAT_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("summary_chat_index");
/// Index: chat_id:node_id -> node_id, live stack members only
const LIVE_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("summary_live_index");
/// Index: summary_id:position -> turn_id
const SOURCE_INDEX_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("summary_source_index");
/// chat_id:kind -> next index for that kind
const INDEX_COUNTER_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("summary_index_counter");

/// One step of an atomic summary write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryWrite {
    /// Insert a new node. Fails if the id already exists.
    PutNode {
        node_id: String,
        chat_id: String,
        kind: String,
        index: u64,
        data: Vec<u8>,
    },
    /// Record the turns a leaf summary was produced from, in window order.
    LinkSources {
        summary_id: String,
        turn_ids: Vec<String>,
    },
    /// Add an existing node to the chat's live stack.
    Activate { chat_id: String, node_id: String },
    /// Remove a node from the chat's live stack. Fails if it is not live.
    Retire { chat_id: String, node_id: String },
}

/// Low-level summary storage with byte-level API
#[derive(Clone)]
pub struct SummaryStorage {
    db: Arc<Database>,
}

impl SummaryStorage {
    /// Create a new SummaryStorage instance and initialize tables.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(NODE_TABLE)?;
        write_txn.open_table(CHAT_INDEX_TABLE)?;
        write_txn.open_table(LIVE_INDEX_TABLE)?;
        write_txn.open_table(SOURCE_INDEX_TABLE)?;
        write_txn.open_table(INDEX_COUNTER_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Apply a batch of writes atomically.
    ///
    /// Any failing step aborts the whole transaction; nothing from the batch
    /// becomes visible.
    pub fn apply(&self, writes: &[SummaryWrite]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        for write in writes {
            Self::apply_one(&write_txn, write)?;
        }
        write_txn.commit()?;
        tracing::trace!(steps = writes.len(), "Committed summary write batch");
        Ok(())
    }

    fn apply_one(write_txn: &WriteTransaction, write: &SummaryWrite) -> Result<()> {
        match write {
            SummaryWrite::PutNode {
                node_id,
                chat_id,
                kind,
                index,
                data,
            } => {
                ensure_key_segment("Chat id", chat_id)?;
                ensure_key_segment("Summary node id", node_id)?;
                let mut node_table = write_txn.open_table(NODE_TABLE)?;
                if node_table.get(node_id.as_str())?.is_some() {
                    bail!("Summary node {} already exists", node_id);
                }
                node_table.insert(node_id.as_str(), data.as_slice())?;

                let mut chat_index = write_txn.open_table(CHAT_INDEX_TABLE)?;
                let chat_key = format!("{}:{}", chat_id, node_id);
                chat_index.insert(chat_key.as_str(), node_id.as_str())?;

                let mut counters = write_txn.open_table(INDEX_COUNTER_TABLE)?;
                let counter_key = format!("{}:{}", chat_id, kind);
                let next = counters
                    .get(counter_key.as_str())?
                    .map(|v| v.value())
                    .unwrap_or(0);
                counters.insert(counter_key.as_str(), next.max(index + 1))?;
            }
            SummaryWrite::LinkSources {
                summary_id,
                turn_ids,
            } => {
                ensure_key_segment("Summary node id", summary_id)?;
                let mut source_index = write_txn.open_table(SOURCE_INDEX_TABLE)?;
                for (position, turn_id) in turn_ids.iter().enumerate() {
                    let key = seq_key(summary_id, position as u64);
                    source_index.insert(key.as_str(), turn_id.as_str())?;
                }
            }
            SummaryWrite::Activate { chat_id, node_id } => {
                ensure_key_segment("Chat id", chat_id)?;
                let node_table = write_txn.open_table(NODE_TABLE)?;
                if node_table.get(node_id.as_str())?.is_none() {
                    bail!("Cannot activate unknown summary node {}", node_id);
                }
                let mut live_index = write_txn.open_table(LIVE_INDEX_TABLE)?;
                let key = format!("{}:{}", chat_id, node_id);
                live_index.insert(key.as_str(), node_id.as_str())?;
            }
            SummaryWrite::Retire { chat_id, node_id } => {
                let mut live_index = write_txn.open_table(LIVE_INDEX_TABLE)?;
                let key = format!("{}:{}", chat_id, node_id);
                if live_index.remove(key.as_str())?.is_none() {
                    bail!("Summary node {} is not on the live stack", node_id);
                }
            }
        }
        Ok(())
    }

    /// Next index for `(chat_id, kind)`: 0 if none exist, else max + 1.
    pub fn next_index(&self, chat_id: &str, kind: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let counters = read_txn.open_table(INDEX_COUNTER_TABLE)?;
        let key = format!("{}:{}", chat_id, kind);
        Ok(counters.get(key.as_str())?.map(|v| v.value()).unwrap_or(0))
    }

    /// Get raw node data by ID
    pub fn get_node_raw(&self, node_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODE_TABLE)?;
        Ok(table.get(node_id)?.map(|v| v.value().to_vec()))
    }

    /// List the live stack members of a chat (unordered).
    pub fn list_live_raw(&self, chat_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.list_indexed(LIVE_INDEX_TABLE, chat_id)
    }

    /// List every node ever written for a chat (unordered).
    pub fn list_nodes_raw(&self, chat_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.list_indexed(CHAT_INDEX_TABLE, chat_id)
    }

    fn list_indexed(
        &self,
        index: TableDefinition<'static, &'static str, &'static str>,
        chat_id: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        ensure_key_segment("Chat id", chat_id)?;
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let node_table = read_txn.open_table(NODE_TABLE)?;

        let (start, end) = prefix_range(&format!("{}:", chat_id));
        let mut nodes = Vec::new();
        for entry in index_table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let node_id = value.value();
            if let Some(data) = node_table.get(node_id)? {
                nodes.push((node_id.to_string(), data.value().to_vec()));
            }
        }
        Ok(nodes)
    }

    /// Turn ids a leaf summary was produced from, in window order.
    pub fn source_turn_ids(&self, summary_id: &str) -> Result<Vec<String>> {
        ensure_key_segment("Summary node id", summary_id)?;
        let read_txn = self.db.begin_read()?;
        let source_index = read_txn.open_table(SOURCE_INDEX_TABLE)?;

        let (start, end) = prefix_range(&format!("{}:", summary_id));
        let mut turn_ids = Vec::new();
        for entry in source_index.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            turn_ids.push(value.value().to_string());
        }
        Ok(turn_ids)
    }
}
