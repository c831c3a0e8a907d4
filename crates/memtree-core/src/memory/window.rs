//! Conversation Window - bounded FIFO of the most recent turns
//!
//! Holds at most `capacity` turns, oldest first, for low-latency prompt
//! assembly. Every eviction is reported to the [`Store`] before the turn
//! leaves memory, so the in-memory window and the persisted active-window
//! index never disagree.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use memtree_core::memory::ConversationWindow;
//! use memtree_core::{EvictionPolicy, InMemoryStore, Store, Turn};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let mut window = ConversationWindow::new("chat", 2, store.clone(), EvictionPolicy::Retain);
//!
//! for content in ["Hello", "Hi!", "How are you?"] {
//!     let turn = store.append_turn(&Turn::user("chat", content)).unwrap();
//!     window.append(turn).unwrap();
//! }
//!
//! assert_eq!(window.len(), 2);
//! assert!(window.to_prompt_text().starts_with("User: Hi!"));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::config::EvictionPolicy;
use crate::error::Result;
use crate::model::Turn;
use crate::store::Store;

/// Bounded window over the most recent turns of one conversation.
pub struct ConversationWindow {
    chat_id: String,
    /// Turns stored in order (oldest first)
    turns: VecDeque<Turn>,
    capacity: usize,
    store: Arc<dyn Store>,
    eviction: EvictionPolicy,
}

impl ConversationWindow {
    pub fn new(
        chat_id: impl Into<String>,
        capacity: usize,
        store: Arc<dyn Store>,
        eviction: EvictionPolicy,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            turns: VecDeque::new(),
            capacity,
            store,
            eviction,
        }
    }

    /// Hydrate from persisted history (oldest first).
    ///
    /// Replaces the current contents with the most recent `capacity` turns.
    /// Older turns are evicted in the store. Returns how many were dropped.
    pub fn initialize(&mut self, turns: Vec<Turn>) -> Result<usize> {
        let excess = turns.len().saturating_sub(self.capacity);
        let mut turns = VecDeque::from(turns);
        for turn in turns.iter().take(excess) {
            self.notify_evicted(&turn.id)?;
        }
        turns.drain(..excess);
        self.turns = turns;
        Ok(excess)
    }

    /// Add a turn, evicting the oldest one if the window would exceed capacity.
    ///
    /// Returns the evicted turn. If the store rejects the eviction, the window
    /// is left unchanged and the error is returned.
    pub fn append(&mut self, turn: Turn) -> Result<Option<Turn>> {
        let evicted = if self.turns.len() >= self.capacity {
            self.evict_oldest()?
        } else {
            None
        };
        self.turns.push_back(turn);
        Ok(evicted)
    }

    /// Evict every held turn, one at a time, oldest first.
    ///
    /// Stops at the first store failure; turns not yet evicted stay in the
    /// window. Returns how many turns were evicted.
    pub fn clear(&mut self) -> Result<usize> {
        let mut evicted = 0;
        while self.evict_oldest()?.is_some() {
            evicted += 1;
        }
        debug!(chat_id = %self.chat_id, evicted, "Window cleared");
        Ok(evicted)
    }

    /// Serialize all held turns, oldest to newest, tagged by sender.
    pub fn to_prompt_text(&self) -> String {
        render_turns(&self.turns)
    }

    /// Ids of all held turns in window order.
    pub fn turn_ids(&self) -> Vec<String> {
        self.turns.iter().map(|turn| turn.id.clone()).collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Snapshot of the held turns, oldest first.
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Turns that can be added before the window is full.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.turns.len())
    }

    pub fn is_full(&self) -> bool {
        self.turns.len() == self.capacity
    }

    fn evict_oldest(&mut self) -> Result<Option<Turn>> {
        let Some(oldest) = self.turns.front() else {
            return Ok(None);
        };
        self.notify_evicted(&oldest.id)?;
        Ok(self.turns.pop_front())
    }

    fn notify_evicted(&self, turn_id: &str) -> Result<()> {
        match self.eviction {
            EvictionPolicy::Retain => self.store.mark_turn_evicted(turn_id),
            EvictionPolicy::Delete => self.store.delete_turn(turn_id),
        }
    }
}

/// `Sender: content` blocks separated by blank lines.
pub(crate) fn render_turns<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> String {
    turns
        .into_iter()
        .map(|turn| format!("{}: {}", turn.sender.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
