//! Memory Coordinator - per-conversation glue between window and stack
//!
//! The coordinator owns one [`ConversationWindow`] and one [`SummaryStack`]
//! and decides when a full window is compacted into a leaf.
//!
//! Window state and stack live behind separate async mutexes, so inserting a
//! turn never waits on a summarizer call. A compaction flag guarantees a
//! single compaction in flight; turns arriving while it runs, or while a
//! failed compaction awaits retry, are persisted and queued in a backlog.
//! Once the window is released the backlog refills it, oldest first.
//!
//! ```text
//! insert_turn ──► window filling ──► full ──► summarize ──► push_leaf ──► clear
//!                      ▲               │          ✗             ✗          │
//!                      │               └── backlog (window stays full) ◄───┘
//!                      └──────────────── refill from backlog ◄─────────────┘
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::lineage::{leaf_records, newest_leaf};
use super::stack::{LeafPush, SummaryStack, rollup};
use super::window::{ConversationWindow, render_turns};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::model::{LeafRecord, SummaryNode, Turn};
use crate::store::Store;
use crate::summarizer::{ResilientSummarizer, Summarizer};

/// Reserved by the storage key layout.
const CHAT_ID_SEPARATOR: char = ':';

/// What a compaction run achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Ids of the leaves created, oldest first.
    pub leaf_ids: Vec<String>,
    /// Turns moved out of the window into leaves.
    pub compacted_turns: usize,
    pub merges: usize,
    /// Live stack length once the run finished.
    pub stack_len: usize,
}

/// Outcome of [`MemoryCoordinator::insert_turn`] and
/// [`MemoryCoordinator::compact`].
#[derive(Debug)]
pub enum CompactionStatus {
    /// The window is not full.
    NotNeeded,
    /// Another compaction is running; the turn was queued behind it.
    InFlight,
    Compacted(CompactionReport),
    /// Compaction failed. The turn is persisted and compaction is retried on
    /// the next insert or an explicit [`compact`](MemoryCoordinator::compact).
    Deferred(MemoryError),
}

impl CompactionStatus {
    pub fn is_deferred(&self) -> bool {
        matches!(self, CompactionStatus::Deferred(_))
    }
}

struct WindowState {
    window: ConversationWindow,
    /// Persisted turns waiting for the window to be released.
    backlog: VecDeque<Turn>,
    /// Every held turn is already covered by a committed leaf.
    unreleased: bool,
}

impl WindowState {
    fn accepts_turns(&self) -> bool {
        !self.window.is_full() && !self.unreleased && self.backlog.is_empty()
    }

    fn needs_compaction(&self) -> bool {
        self.window.is_full() || self.unreleased
    }

    /// Evict the compacted turns and refill from the backlog.
    fn release(&mut self) -> Result<usize> {
        self.unreleased = true;
        let evicted = self.window.clear()?;
        self.unreleased = false;
        while !self.window.is_full() {
            let Some(turn) = self.backlog.pop_front() else {
                break;
            };
            self.window.append(turn)?;
        }
        Ok(evicted)
    }
}

struct CompactionGuard<'a>(&'a AtomicBool);

impl<'a> CompactionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CompactionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bounded, reconstructable memory for one conversation.
///
/// Exactly one coordinator may be active per conversation; the owning
/// application enforces that.
pub struct MemoryCoordinator {
    chat_id: String,
    config: MemoryConfig,
    store: Arc<dyn Store>,
    summarizer: Arc<dyn Summarizer>,
    state: Mutex<WindowState>,
    stack: Mutex<SummaryStack>,
    compacting: AtomicBool,
}

impl MemoryCoordinator {
    /// Create a coordinator. The summarizer is wrapped with the configured
    /// timeout and retry policy.
    pub fn new(
        chat_id: impl Into<String>,
        config: MemoryConfig,
        store: Arc<dyn Store>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        config.validate()?;
        let chat_id = chat_id.into();
        if chat_id.trim().is_empty() {
            return Err(MemoryError::Validation("Chat id is empty".to_string()));
        }
        if chat_id.contains(CHAT_ID_SEPARATOR) {
            return Err(MemoryError::Validation(format!(
                "Chat id {chat_id:?} must not contain '{CHAT_ID_SEPARATOR}'"
            )));
        }

        let summarizer: Arc<dyn Summarizer> = Arc::new(ResilientSummarizer::new(
            summarizer,
            config.summarizer_timeout(),
            config.retry.clone(),
        ));
        let window = ConversationWindow::new(
            chat_id.clone(),
            config.window_capacity,
            store.clone(),
            config.eviction,
        );
        let stack = SummaryStack::new(chat_id.clone(), store.clone(), summarizer.clone());

        Ok(Self {
            chat_id,
            config,
            store,
            summarizer,
            state: Mutex::new(WindowState {
                window,
                backlog: VecDeque::new(),
                unreleased: false,
            }),
            stack: Mutex::new(stack),
            compacting: AtomicBool::new(false),
        })
    }

    /// Load persisted state: active turns into the window (overflow into the
    /// backlog) and the live stack, repaired if it is inconsistent.
    ///
    /// Active turns already linked to the newest leaf belong to a window whose
    /// leaf committed but whose eviction did not. They are released instead of
    /// being summarized again. A failed repair or release is logged and
    /// retried by the next compaction.
    pub async fn initialize(&self) -> Result<()> {
        let (compacted, stack_len) = {
            let mut stack = self.stack.lock().await;
            if !stack.rehydrate()? {
                if let Err(err) = stack.repair().await {
                    warn!(
                        chat_id = %self.chat_id,
                        error = %err,
                        "Stack repair failed, retrying before next leaf push"
                    );
                }
            }
            let compacted: HashSet<String> = match stack.snapshot().last() {
                Some(top) => {
                    let leaf = newest_leaf(self.store.as_ref(), top)?;
                    self.store.source_turn_ids(&leaf.id)?.into_iter().collect()
                }
                None => HashSet::new(),
            };
            (compacted, stack.len())
        };

        let mut turns = self.store.load_recent_turns(&self.chat_id, usize::MAX)?;
        let released = turns
            .iter()
            .take_while(|turn| compacted.contains(&turn.id))
            .count();

        let mut state = self.state.lock().await;
        if released > 0 {
            let pending = turns.split_off(released);
            state.window.initialize(turns)?;
            state.backlog = pending.into();
            info!(
                chat_id = %self.chat_id,
                released,
                "Releasing turns already covered by the newest leaf"
            );
            if let Err(err) = state.release() {
                warn!(
                    chat_id = %self.chat_id,
                    error = %err,
                    "Failed to release compacted window, retrying on next compaction"
                );
            }
        } else {
            let overflow = turns.split_off(turns.len().min(self.config.window_capacity));
            state.window.initialize(turns)?;
            state.backlog = overflow.into();
            state.unreleased = false;
        }

        info!(
            chat_id = %self.chat_id,
            window = state.window.len(),
            backlog = state.backlog.len(),
            stack = stack_len,
            "Memory initialized"
        );
        Ok(())
    }

    /// Persist a turn, add it to the window and compact if the window is full.
    ///
    /// Only a failure to persist the turn is an error. Compaction failures are
    /// reported as [`CompactionStatus::Deferred`]; the turn is kept either way.
    pub async fn insert_turn(&self, turn: Turn) -> Result<CompactionStatus> {
        if turn.chat_id != self.chat_id {
            return Err(MemoryError::Validation(format!(
                "Turn {} belongs to chat {}, not {}",
                turn.id, turn.chat_id, self.chat_id
            )));
        }
        let turn = self.store.append_turn(&turn)?;

        let needs_compaction = {
            let mut state = self.state.lock().await;
            if state.accepts_turns() {
                state.window.append(turn)?;
            } else {
                state.backlog.push_back(turn);
                let backlog = state.backlog.len();
                let threshold = self.config.backlog_warn_threshold();
                if backlog % threshold == 0 {
                    warn!(chat_id = %self.chat_id, backlog, "Uncompacted backlog is growing");
                }
            }
            state.needs_compaction()
        };

        if !needs_compaction {
            return Ok(CompactionStatus::NotNeeded);
        }
        match self.compact().await {
            Ok(status) => Ok(status),
            Err(err) => {
                warn!(chat_id = %self.chat_id, error = %err, "Compaction deferred");
                Ok(CompactionStatus::Deferred(err))
            }
        }
    }

    /// Compact the window into leaves while it is full.
    ///
    /// The window is cleared only after its leaf commits. If the leaf commits
    /// but its merge fails, the window is still cleared and the
    /// [`MemoryError::MergeDeferred`] error is returned. Any other failure
    /// leaves the window full for a later retry.
    pub async fn compact(&self) -> Result<CompactionStatus> {
        let mut report = CompactionReport::default();
        loop {
            let Some(guard) = CompactionGuard::acquire(&self.compacting) else {
                if report.leaf_ids.is_empty() {
                    debug!(chat_id = %self.chat_id, "Compaction already in flight");
                    return Ok(CompactionStatus::InFlight);
                }
                break;
            };
            self.compact_full_windows(&mut report).await?;
            drop(guard);

            // Turns inserted while the flag was still set were told InFlight
            if !self.needs_compaction().await {
                break;
            }
        }

        if report.leaf_ids.is_empty() {
            return Ok(CompactionStatus::NotNeeded);
        }
        report.stack_len = self.stack.lock().await.len();
        info!(
            chat_id = %self.chat_id,
            leaves = report.leaf_ids.len(),
            merges = report.merges,
            stack = report.stack_len,
            "Compaction finished"
        );
        Ok(CompactionStatus::Compacted(report))
    }

    /// One summary of the whole compacted history. Read-only.
    pub async fn generate_full_summary(&self) -> Result<Option<String>> {
        let nodes = self.stack.lock().await.snapshot();
        rollup(self.summarizer.as_ref(), &nodes).await
    }

    /// Every leaf of the live tree, oldest first, with its source turn ids.
    pub async fn reconstruct(&self) -> Result<Vec<LeafRecord>> {
        let roots = self.stack.lock().await.snapshot();
        leaf_records(self.store.as_ref(), &roots)
    }

    /// Live summaries (oldest first) followed by every uncompacted turn.
    pub async fn prompt_context(&self) -> String {
        let summaries: Vec<String> = self
            .stack
            .lock()
            .await
            .snapshot()
            .into_iter()
            .map(|node| node.summary)
            .collect();
        let turns = {
            let state = self.state.lock().await;
            render_turns(state.window.iter().chain(state.backlog.iter()))
        };

        let mut sections = Vec::new();
        if !summaries.is_empty() {
            sections.push(format!(
                "## Conversation Summary\n\n{}",
                summaries.join("\n\n")
            ));
        }
        if !turns.is_empty() {
            sections.push(format!("## Recent Conversation\n\n{turns}"));
        }
        sections.join("\n\n")
    }

    /// Live stack, bottom to top.
    pub async fn stack_snapshot(&self) -> Vec<SummaryNode> {
        self.stack.lock().await.snapshot()
    }

    /// Turns held by the window, oldest first.
    pub async fn window_turns(&self) -> Vec<Turn> {
        self.state.lock().await.window.turns()
    }

    pub async fn backlog_len(&self) -> usize {
        self.state.lock().await.backlog.len()
    }

    pub async fn needs_compaction(&self) -> bool {
        self.state.lock().await.needs_compaction()
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::Acquire)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Summarize full windows into leaves until the window has room.
    /// Must be called with the compaction flag held.
    async fn compact_full_windows(&self, report: &mut CompactionReport) -> Result<()> {
        loop {
            let (prompt, turn_ids) = {
                let mut state = self.state.lock().await;
                if state.unreleased {
                    state.release()?;
                }
                if !state.window.is_full() {
                    return Ok(());
                }
                (state.window.to_prompt_text(), state.window.turn_ids())
            };

            let turns = turn_ids.len();
            debug!(chat_id = %self.chat_id, turns, "Compacting window");
            match self.summarize_window(&prompt, turn_ids).await {
                Ok(push) => {
                    self.release_window().await?;
                    report.leaf_ids.push(push.leaf.id);
                    report.compacted_turns += turns;
                    report.merges += push.merges;
                }
                Err(err @ MemoryError::MergeDeferred { .. }) => {
                    if let Err(release_err) = self.release_window().await {
                        warn!(
                            chat_id = %self.chat_id,
                            error = %release_err,
                            "Failed to release compacted window"
                        );
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn summarize_window(&self, prompt: &str, turn_ids: Vec<String>) -> Result<LeafPush> {
        let summary = self.summarizer.summarize(prompt).await?;
        self.stack.lock().await.push_leaf(summary, turn_ids).await
    }

    async fn release_window(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let evicted = state.release()?;
        debug!(
            chat_id = %self.chat_id,
            evicted,
            refilled = state.window.len(),
            backlog = state.backlog.len(),
            "Window released"
        );
        Ok(())
    }
}
