//! Turn storage - byte-level API for raw conversation turns.
//!
//! Every turn is stored once and indexed twice: by arrival order within its
//! chat (kept forever for audit) and in the active-window index, which only
//! holds turns that have not been evicted yet.
//!
//! # Tables
//!
//! - `conversation_turns`: turn_id -> turn_data
//! - `conversation_turn_location`: turn_id -> chat_id:seq
//! - `conversation_turn_chat_index`: chat_id:seq -> turn_id (all turns)
//! - `conversation_turn_active_index`: chat_id:seq -> turn_id (window turns)
//! - `conversation_turn_seq`: chat_id -> next sequence number

use anyhow::{Result, bail};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::{ensure_key_segment, prefix_range, seq_key};

const TURN_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("conversation_turns");
/// turn_id -> chat_id:seq
const TURN_LOCATION_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("conversation_turn_location");
/// Index: chat_id:seq -> turn_id
const CHAT_INDEX_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("conversation_turn_chat_index");
/// Index: chat_id:seq -> turn_id, only for turns still held by a window
const ACTIVE_INDEX_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("conversation_turn_active_index");
const SEQ_TABLE: TableDefinition<&str, u64> = TableDefinition::new("conversation_turn_seq");

/// Low-level turn storage with byte-level API
#[derive(Clone)]
pub struct TurnStorage {
    db: Arc<Database>,
}

impl TurnStorage {
    /// Create a new TurnStorage instance and initialize tables.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(TURN_TABLE)?;
        write_txn.open_table(TURN_LOCATION_TABLE)?;
        write_txn.open_table(CHAT_INDEX_TABLE)?;
        write_txn.open_table(ACTIVE_INDEX_TABLE)?;
        write_txn.open_table(SEQ_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a turn to a chat and mark it active.
    ///
    /// Returns the per-chat sequence number assigned to the turn. Turn ids are
    /// immutable: appending an id that already exists is an error. Chat ids
    /// must be non-empty and free of `:`.
    pub fn append_raw(&self, turn_id: &str, chat_id: &str, data: &[u8]) -> Result<u64> {
        ensure_key_segment("Chat id", chat_id)?;
        let write_txn = self.db.begin_write()?;
        let seq = {
            let mut turn_table = write_txn.open_table(TURN_TABLE)?;
            if turn_table.get(turn_id)?.is_some() {
                bail!("Turn {} already exists", turn_id);
            }
            turn_table.insert(turn_id, data)?;

            let mut seq_table = write_txn.open_table(SEQ_TABLE)?;
            let seq = seq_table.get(chat_id)?.map(|v| v.value()).unwrap_or(0);
            seq_table.insert(chat_id, seq + 1)?;

            let key = seq_key(chat_id, seq);
            let mut location = write_txn.open_table(TURN_LOCATION_TABLE)?;
            location.insert(turn_id, key.as_str())?;

            let mut chat_index = write_txn.open_table(CHAT_INDEX_TABLE)?;
            chat_index.insert(key.as_str(), turn_id)?;

            let mut active_index = write_txn.open_table(ACTIVE_INDEX_TABLE)?;
            active_index.insert(key.as_str(), turn_id)?;

            seq
        };
        write_txn.commit()?;
        Ok(seq)
    }

    /// Get raw turn data by ID
    pub fn get_raw(&self, turn_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TURN_TABLE)?;
        Ok(table.get(turn_id)?.map(|v| v.value().to_vec()))
    }

    /// Get raw data for several turns, skipping ids that no longer exist.
    pub fn get_many_raw(&self, turn_ids: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TURN_TABLE)?;

        let mut turns = Vec::with_capacity(turn_ids.len());
        for id in turn_ids {
            if let Some(data) = table.get(id.as_str())? {
                turns.push((id.clone(), data.value().to_vec()));
            }
        }
        Ok(turns)
    }

    /// Remove a turn from the active-window index, keeping its data.
    ///
    /// Returns `false` if the turn was already evicted. Unknown turns are an error.
    pub fn mark_evicted(&self, turn_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let was_active = {
            let location = write_txn.open_table(TURN_LOCATION_TABLE)?;
            let Some(key) = location.get(turn_id)?.map(|v| v.value().to_string()) else {
                bail!("Turn {} not found", turn_id);
            };

            let mut active_index = write_txn.open_table(ACTIVE_INDEX_TABLE)?;
            active_index.remove(key.as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(was_active)
    }

    /// Delete a turn and all of its index entries.
    ///
    /// Returns `false` if the turn did not exist.
    pub fn delete(&self, turn_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut location = write_txn.open_table(TURN_LOCATION_TABLE)?;
            let key = location.remove(turn_id)?.map(|v| v.value().to_string());

            if let Some(key) = key {
                let mut chat_index = write_txn.open_table(CHAT_INDEX_TABLE)?;
                chat_index.remove(key.as_str())?;
                let mut active_index = write_txn.open_table(ACTIVE_INDEX_TABLE)?;
                active_index.remove(key.as_str())?;
            }

            let mut turn_table = write_txn.open_table(TURN_TABLE)?;
            turn_table.remove(turn_id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// List the most recent `limit` active turns of a chat, oldest first.
    pub fn list_active_raw(&self, chat_id: &str, limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
        ensure_key_segment("Chat id", chat_id)?;
        let read_txn = self.db.begin_read()?;
        let active_index = read_txn.open_table(ACTIVE_INDEX_TABLE)?;
        let turn_table = read_txn.open_table(TURN_TABLE)?;

        let (start, end) = prefix_range(&format!("{}:", chat_id));
        let mut ids = Vec::new();
        for entry in active_index.range(start.as_str()..end.as_str())?.rev() {
            if ids.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            ids.push(value.value().to_string());
        }
        ids.reverse();

        let mut turns = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(data) = turn_table.get(id.as_str())? {
                turns.push((id, data.value().to_vec()));
            }
        }
        Ok(turns)
    }

    /// List every stored turn of a chat in arrival order, evicted ones included.
    pub fn list_all_raw(&self, chat_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        ensure_key_segment("Chat id", chat_id)?;
        let read_txn = self.db.begin_read()?;
        let chat_index = read_txn.open_table(CHAT_INDEX_TABLE)?;
        let turn_table = read_txn.open_table(TURN_TABLE)?;

        let (start, end) = prefix_range(&format!("{}:", chat_id));
        let mut turns = Vec::new();
        for entry in chat_index.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let turn_id = value.value();
            if let Some(data) = turn_table.get(turn_id)? {
                turns.push((turn_id.to_string(), data.value().to_vec()));
            }
        }
        Ok(turns)
    }

    /// Whether the turn is still held by a window.
    pub fn is_active(&self, turn_id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let location = read_txn.open_table(TURN_LOCATION_TABLE)?;
        let Some(key) = location.get(turn_id)?.map(|v| v.value().to_string()) else {
            return Ok(false);
        };
        let active_index = read_txn.open_table(ACTIVE_INDEX_TABLE)?;
        Ok(active_index.get(key.as_str())?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Arc<Database> {
        Arc::new(
            Database::builder()
                .create_with_backend(redb::backends::InMemoryBackend::new())
                .unwrap(),
        )
    }

    fn ids(turns: &[(String, Vec<u8>)]) -> Vec<&str> {
        turns.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[test]
    fn test_append_assigns_sequence_per_chat() {
        let storage = TurnStorage::new(setup_db()).unwrap();

        assert_eq!(storage.append_raw("t1", "chat-a", b"one").unwrap(), 0);
        assert_eq!(storage.append_raw("t2", "chat-a", b"two").unwrap(), 1);
        assert_eq!(storage.append_raw("t3", "chat-b", b"three").unwrap(), 0);

        assert_eq!(storage.get_raw("t2").unwrap().unwrap(), b"two".to_vec());
    }

    #[test]
    fn test_append_duplicate_id_fails() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        storage.append_raw("t1", "chat", b"one").unwrap();
        assert!(storage.append_raw("t1", "chat", b"again").is_err());
        assert_eq!(storage.list_all_raw("chat").unwrap().len(), 1);
    }

    #[test]
    fn test_list_active_returns_most_recent_oldest_first() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        for i in 0..12 {
            storage
                .append_raw(&format!("t{i}"), "chat", format!("m{i}").as_bytes())
                .unwrap();
        }
        storage.append_raw("other", "chat-2", b"x").unwrap();

        let recent = storage.list_active_raw("chat", 3).unwrap();
        assert_eq!(ids(&recent), vec!["t9", "t10", "t11"]);

        let all = storage.list_active_raw("chat", usize::MAX).unwrap();
        assert_eq!(all.len(), 12);
        assert_eq!(all[0].0, "t0");
    }

    #[test]
    fn test_chat_ids_sharing_a_prefix_stay_apart() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        storage.append_raw("t1", "team", b"one").unwrap();
        storage.append_raw("t2", "team-ops", b"two").unwrap();

        assert!(storage.append_raw("t3", "team:ops", b"three").is_err());
        assert!(storage.get_raw("t3").unwrap().is_none());
        assert_eq!(ids(&storage.list_active_raw("team", 10).unwrap()), vec!["t1"]);
        assert_eq!(ids(&storage.list_all_raw("team").unwrap()), vec!["t1"]);
        assert!(storage.list_all_raw("team:ops").is_err());
    }

    #[test]
    fn test_mark_evicted_keeps_data_for_audit() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        storage.append_raw("t1", "chat", b"one").unwrap();
        storage.append_raw("t2", "chat", b"two").unwrap();

        assert!(storage.mark_evicted("t1").unwrap());
        assert!(!storage.mark_evicted("t1").unwrap());
        assert!(!storage.is_active("t1").unwrap());
        assert!(storage.is_active("t2").unwrap());

        assert_eq!(ids(&storage.list_active_raw("chat", 10).unwrap()), vec!["t2"]);
        assert_eq!(ids(&storage.list_all_raw("chat").unwrap()), vec!["t1", "t2"]);
        assert!(storage.get_raw("t1").unwrap().is_some());
    }

    #[test]
    fn test_mark_evicted_unknown_turn_fails() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        assert!(storage.mark_evicted("missing").is_err());
    }

    #[test]
    fn test_delete_removes_all_entries() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        storage.append_raw("t1", "chat", b"one").unwrap();
        storage.append_raw("t2", "chat", b"two").unwrap();

        assert!(storage.delete("t1").unwrap());
        assert!(!storage.delete("t1").unwrap());
        assert!(storage.get_raw("t1").unwrap().is_none());
        assert_eq!(ids(&storage.list_all_raw("chat").unwrap()), vec!["t2"]);
        assert_eq!(ids(&storage.list_active_raw("chat", 10).unwrap()), vec!["t2"]);
    }

    #[test]
    fn test_get_many_skips_missing() {
        let storage = TurnStorage::new(setup_db()).unwrap();
        storage.append_raw("t1", "chat", b"one").unwrap();
        storage.append_raw("t2", "chat", b"two").unwrap();

        let found = storage
            .get_many_raw(&["t2".to_string(), "gone".to_string(), "t1".to_string()])
            .unwrap();
        assert_eq!(ids(&found), vec!["t2", "t1"]);
    }
}
