//! memtree Storage - Low-level storage abstraction layer
//!
//! This crate provides the persistence layer for memtree, using redb as the
//! embedded database. It exposes byte-level APIs so it has no dependency on
//! the core crate's model types; serialization lives in the core's store
//! adapter.
//!
//! # Tables
//!
//! - `conversation_turns*` - Raw turns and their chat / active-window indexes
//! - `summary_*` - Summary nodes, live stack index, source-turn links and
//!   per-kind index counters

pub mod range_utils;
pub mod summary;
pub mod turns;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use summary::{SummaryStorage, SummaryWrite};
pub use turns::TurnStorage;

/// Central storage manager that initializes all storage subsystems
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
    pub turns: TurnStorage,
    pub summaries: SummaryStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path.as_ref())?);
        Self::from_database(db)
    }

    /// Create a storage instance backed by memory only.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::from_database(Arc::new(db))
    }

    /// Wrap an already opened database and initialize all tables.
    pub fn from_database(db: Arc<Database>) -> Result<Self> {
        let turns = TurnStorage::new(db.clone())?;
        let summaries = SummaryStorage::new(db.clone())?;
        Ok(Self {
            db,
            turns,
            summaries,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
