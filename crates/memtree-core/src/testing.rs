//! Test doubles for the summarizer and store capabilities.
//!
//! Available to unit tests and, through the `test-utils` feature, to
//! integration tests and downstream crates.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{MemoryError, Result};
use crate::model::{NodeKind, SummaryNode, Turn};
use crate::store::{InMemoryStore, Store, StoreOp};
use crate::summarizer::Summarizer;

/// Injected failure for a scripted summarizer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Network-style failure, safe to retry.
    Transient,
    /// The model answered with something unusable.
    Malformed,
}

impl Failure {
    fn into_error(self, call: &str, number: usize) -> MemoryError {
        match self {
            Failure::Transient => {
                MemoryError::TransientRemote(format!("scripted {call} failure #{number}"))
            }
            Failure::Malformed => {
                MemoryError::Summarizer(format!("scripted malformed {call} output #{number}"))
            }
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    summarize_calls: Vec<String>,
    pair_calls: Vec<(String, String)>,
    summarize_failures: HashMap<usize, Failure>,
    pair_failures: HashMap<usize, Failure>,
}

/// Deterministic summarizer that records every call.
///
/// `summarize(text)` answers `S(text)` and `summarize_pair(a, b)` answers
/// `[a | b]`, so the shape of a merged summary shows the order of its inputs.
/// Failures are scripted per 1-based call number.
#[derive(Debug, Default)]
pub struct ScriptedSummarizer {
    state: Mutex<ScriptState>,
    delay: Option<Duration>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_summarize_call(&self, call_number: usize, failure: Failure) {
        self.state
            .lock()
            .summarize_failures
            .insert(call_number, failure);
    }

    pub fn fail_pair_call(&self, call_number: usize, failure: Failure) {
        self.state.lock().pair_failures.insert(call_number, failure);
    }

    pub fn summarize_calls(&self) -> Vec<String> {
        self.state.lock().summarize_calls.clone()
    }

    pub fn pair_calls(&self) -> Vec<(String, String)> {
        self.state.lock().pair_calls.clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, prompt_text: &str) -> Result<String> {
        let (number, failure) = {
            let mut state = self.state.lock();
            state.summarize_calls.push(prompt_text.to_string());
            let number = state.summarize_calls.len();
            (number, state.summarize_failures.remove(&number))
        };
        self.pause().await;

        if let Some(failure) = failure {
            return Err(failure.into_error("summarize", number));
        }
        if prompt_text.trim().is_empty() {
            return Err(MemoryError::Validation("Conversation text is empty".to_string()));
        }
        Ok(format!("S({prompt_text})"))
    }

    async fn summarize_pair(&self, older: &str, newer: &str) -> Result<String> {
        let (number, failure) = {
            let mut state = self.state.lock();
            state
                .pair_calls
                .push((older.to_string(), newer.to_string()));
            let number = state.pair_calls.len();
            (number, state.pair_failures.remove(&number))
        };
        self.pause().await;

        if let Some(failure) = failure {
            return Err(failure.into_error("summarize_pair", number));
        }
        Ok(format!("[{older} | {newer}]"))
    }
}

/// Store wrapper that fails selected operations on demand and counts writes.
pub struct FlakyStore {
    inner: Arc<dyn Store>,
    failing_transactions: AtomicUsize,
    failing_evictions: AtomicUsize,
    transactions: AtomicUsize,
    evictions: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            failing_transactions: AtomicUsize::new(0),
            failing_evictions: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Fail the next `count` transactions.
    pub fn fail_transactions(&self, count: usize) {
        self.failing_transactions.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` eviction notifications (mark or delete).
    pub fn fail_evictions(&self, count: usize) {
        self.failing_evictions.store(count, Ordering::SeqCst);
    }

    /// Transactions that were attempted, failed ones included.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Evictions that reached the inner store.
    pub fn eviction_count(&self) -> usize {
        self.evictions.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn evict_with(&self, turn_id: &str, evict: impl FnOnce() -> Result<()>) -> Result<()> {
        if Self::take_failure(&self.failing_evictions) {
            return Err(MemoryError::Persistence(format!(
                "injected eviction failure for {turn_id}"
            )));
        }
        evict()?;
        self.evictions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Store for FlakyStore {
    fn append_turn(&self, turn: &Turn) -> Result<Turn> {
        self.inner.append_turn(turn)
    }

    fn mark_turn_evicted(&self, turn_id: &str) -> Result<()> {
        self.evict_with(turn_id, || self.inner.mark_turn_evicted(turn_id))
    }

    fn delete_turn(&self, turn_id: &str) -> Result<()> {
        self.evict_with(turn_id, || self.inner.delete_turn(turn_id))
    }

    fn load_recent_turns(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>> {
        self.inner.load_recent_turns(chat_id, limit)
    }

    fn load_all_turns(&self, chat_id: &str) -> Result<Vec<Turn>> {
        self.inner.load_all_turns(chat_id)
    }

    fn load_turns(&self, turn_ids: &[String]) -> Result<Vec<Turn>> {
        self.inner.load_turns(turn_ids)
    }

    fn load_stack_snapshot(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        self.inner.load_stack_snapshot(chat_id)
    }

    fn load_all_nodes(&self, chat_id: &str) -> Result<Vec<SummaryNode>> {
        self.inner.load_all_nodes(chat_id)
    }

    fn load_node(&self, node_id: &str) -> Result<Option<SummaryNode>> {
        self.inner.load_node(node_id)
    }

    fn source_turn_ids(&self, summary_id: &str) -> Result<Vec<String>> {
        self.inner.source_turn_ids(summary_id)
    }

    fn next_index(&self, chat_id: &str, kind: NodeKind) -> Result<u64> {
        self.inner.next_index(chat_id, kind)
    }

    fn run_transaction(&self, ops: Vec<StoreOp>) -> Result<()> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_transactions) {
            return Err(MemoryError::Persistence(
                "injected transaction failure".to_string(),
            ));
        }
        self.inner.run_transaction(ops)
    }
}

/// Numbered user/system turns alternating, ids `t1`, `t2`, ...
pub fn numbered_turns(chat_id: &str, range: std::ops::RangeInclusive<usize>) -> Vec<Turn> {
    range
        .map(|n| {
            let turn = if n % 2 == 1 {
                Turn::user(chat_id, format!("t{n}"))
            } else {
                Turn::system(chat_id, format!("t{n}"))
            };
            turn.with_id(format!("t{n}"))
        })
        .collect()
}
