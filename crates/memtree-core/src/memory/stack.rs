//! Summary Stack - incremental merge tree over compacted windows
//!
//! Every compacted window becomes a leaf of size 1. Pushing a leaf works like
//! incrementing a binary counter: while the two topmost nodes have the same
//! size they are merged into a parent covering both, so after M pushes the
//! live sizes are exactly the powers of two in the binary form of M and the
//! stack never holds more than `floor(log2 M) + 1` nodes.
//!
//! ```text
//! push 1: [1]
//! push 2: [1, 1] -> [2]
//! push 3: [2, 1]
//! push 4: [2, 1, 1] -> [2, 2] -> [4]
//! ```
//!
//! # Merge atomicity
//!
//! A merge never pops anything until it is durable. The two top nodes are
//! peeked, the summarizer is asked for the merged text, and only then a
//! single store transaction creates the parent and swaps the stack pointers.
//! The in-memory stack is updated after that transaction commits, so a failed
//! or abandoned summarizer call leaves both children in place in their
//! original order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::model::{NodeKind, SummaryNode};
use crate::store::{Store, StoreOp};
use crate::summarizer::Summarizer;

/// Result of a successful [`SummaryStack::push_leaf`].
#[derive(Debug, Clone)]
pub struct LeafPush {
    pub leaf: SummaryNode,
    /// Merges performed by the carry pass that followed the push.
    pub merges: usize,
}

/// Live summary nodes of one conversation, bottom (oldest) to top (newest).
pub struct SummaryStack {
    chat_id: String,
    nodes: Vec<SummaryNode>,
    store: Arc<dyn Store>,
    summarizer: Arc<dyn Summarizer>,
}

impl SummaryStack {
    pub fn new(
        chat_id: impl Into<String>,
        store: Arc<dyn Store>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            nodes: Vec::new(),
            store,
            summarizer,
        }
    }

    /// Replace the in-memory stack with the persisted live nodes.
    ///
    /// Nodes are ordered by descending size, ties broken by creation time.
    /// Returns whether the loaded stack satisfies the consolidation
    /// invariant; a violation is logged and left for [`repair`](Self::repair).
    pub fn rehydrate(&mut self) -> Result<bool> {
        let mut nodes = self.store.load_stack_snapshot(&self.chat_id)?;
        sort_stack(&mut nodes);
        self.nodes = nodes;

        let consolidated = self.is_consolidated();
        if !consolidated {
            let err = MemoryError::Consistency(format!(
                "live stack sizes {:?} repeat a size",
                self.sizes()
            ));
            warn!(chat_id = %self.chat_id, error = %err, "Loaded inconsistent summary stack");
        }
        debug!(
            chat_id = %self.chat_id,
            nodes = self.nodes.len(),
            consolidated,
            "Summary stack rehydrated"
        );
        Ok(consolidated)
    }

    /// Persist a new leaf, link it to its source turns and run the carry pass.
    ///
    /// If the stack is not consolidated (an earlier merge was deferred), it is
    /// repaired first; a failed repair aborts the push before anything is
    /// written. If the leaf commits but a merge after it fails, the result is
    /// [`MemoryError::MergeDeferred`] and the leaf stays on the stack.
    pub async fn push_leaf(
        &mut self,
        summary: impl Into<String>,
        source_turn_ids: Vec<String>,
    ) -> Result<LeafPush> {
        let summary = summary.into();
        if summary.trim().is_empty() {
            return Err(MemoryError::Validation("Leaf summary is empty".to_string()));
        }
        if !self.is_consolidated() {
            self.repair().await?;
        }

        let index = self.store.next_index(&self.chat_id, NodeKind::Leaf)?;
        let leaf = SummaryNode::leaf(&self.chat_id, index, summary);
        self.store.run_transaction(vec![
            StoreOp::CreateSummaryNode(leaf.clone()),
            StoreOp::LinkSourceTurns {
                summary_id: leaf.id.clone(),
                turn_ids: source_turn_ids,
            },
            StoreOp::PushStack {
                chat_id: self.chat_id.clone(),
                node_id: leaf.id.clone(),
            },
        ])?;
        self.nodes.push(leaf.clone());
        info!(chat_id = %self.chat_id, node_id = %leaf.id, index, "Leaf pushed");

        match self.merge_if_needed().await {
            Ok(merges) => Ok(LeafPush { leaf, merges }),
            Err(source) => Err(MemoryError::MergeDeferred {
                leaf_id: leaf.id,
                source: Box::new(source),
            }),
        }
    }

    /// Merge the two topmost nodes while their sizes are equal.
    ///
    /// Returns the number of merges. Does nothing, and writes nothing, when
    /// the top two sizes differ.
    pub async fn merge_if_needed(&mut self) -> Result<usize> {
        let mut merges = 0;
        while let Some((older, newer)) = self.equal_top_pair() {
            self.merge(older, newer).await?;
            merges += 1;
        }
        Ok(merges)
    }

    /// Re-run the carry pass over the whole stack, bottom to top.
    ///
    /// Consolidates equal sizes anywhere in the stack, e.g. after a crash
    /// between a leaf push and its merge. Each merge commits on its own. On
    /// failure the merges done so far are kept and the remaining nodes are put
    /// back above them.
    pub async fn repair(&mut self) -> Result<usize> {
        if self.is_consolidated() {
            return Ok(0);
        }
        warn!(chat_id = %self.chat_id, sizes = ?self.sizes(), "Repairing summary stack");

        let mut pending: VecDeque<SummaryNode> = std::mem::take(&mut self.nodes).into();
        let mut merges = 0;
        while let Some(node) = pending.pop_front() {
            self.nodes.push(node);
            match self.merge_if_needed().await {
                Ok(count) => merges += count,
                Err(err) => {
                    self.nodes.extend(pending);
                    warn!(chat_id = %self.chat_id, error = %err, "Summary stack repair failed");
                    return Err(err);
                }
            }
        }

        if !self.is_consolidated() {
            return Err(MemoryError::Consistency(format!(
                "live stack sizes {:?} still repeat a size after repair",
                self.sizes()
            )));
        }
        info!(chat_id = %self.chat_id, merges, "Summary stack repaired");
        Ok(merges)
    }

    /// Roll the whole stack up into one summary without touching it.
    pub async fn summarize_all(&self) -> Result<Option<String>> {
        rollup(self.summarizer.as_ref(), &self.nodes).await
    }

    /// No two live nodes share a size.
    pub fn is_consolidated(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        self.nodes.iter().all(|node| seen.insert(node.size))
    }

    /// Ordered copy of the live nodes, bottom to top.
    pub fn snapshot(&self) -> Vec<SummaryNode> {
        self.nodes.clone()
    }

    pub fn sizes(&self) -> Vec<u64> {
        self.nodes.iter().map(|node| node.size).collect()
    }

    /// Number of leaves covered by the live nodes.
    pub fn total_size(&self) -> u64 {
        self.nodes.iter().map(|node| node.size).sum()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn equal_top_pair(&self) -> Option<(SummaryNode, SummaryNode)> {
        match self.nodes.as_slice() {
            [.., older, newer] if older.size == newer.size => Some((older.clone(), newer.clone())),
            _ => None,
        }
    }

    async fn merge(&mut self, older: SummaryNode, newer: SummaryNode) -> Result<()> {
        let summary = match self
            .summarizer
            .summarize_pair(&older.summary, &newer.summary)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                warn!(
                    chat_id = %self.chat_id,
                    older = %older.id,
                    newer = %newer.id,
                    error = %err,
                    "Merge failed, children kept on stack"
                );
                return Err(err);
            }
        };

        let index = self.store.next_index(&self.chat_id, NodeKind::Node)?;
        let parent = SummaryNode::merged(&older, &newer, index, summary);
        self.store.run_transaction(vec![
            StoreOp::CreateSummaryNode(parent.clone()),
            StoreOp::PopStack {
                chat_id: self.chat_id.clone(),
                node_id: newer.id.clone(),
            },
            StoreOp::PopStack {
                chat_id: self.chat_id.clone(),
                node_id: older.id.clone(),
            },
            StoreOp::PushStack {
                chat_id: self.chat_id.clone(),
                node_id: parent.id.clone(),
            },
        ])?;

        self.nodes.truncate(self.nodes.len() - 2);
        debug!(
            chat_id = %self.chat_id,
            node_id = %parent.id,
            size = parent.size,
            "Merged summary nodes"
        );
        self.nodes.push(parent);
        Ok(())
    }
}

/// Order persisted live nodes bottom to top: largest first, then oldest.
pub fn sort_stack(nodes: &mut [SummaryNode]) {
    nodes.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.index.cmp(&b.index))
    });
}

/// Fold `nodes` (bottom to top) into one text by repeatedly merging the two
/// topmost entries, older first. Nothing is persisted.
pub async fn rollup(summarizer: &dyn Summarizer, nodes: &[SummaryNode]) -> Result<Option<String>> {
    let mut texts: Vec<String> = nodes.iter().map(|node| node.summary.clone()).collect();
    while texts.len() > 1 {
        let (Some(newer), Some(older)) = (texts.pop(), texts.pop()) else {
            break;
        };
        texts.push(summarizer.summarize_pair(&older, &newer).await?);
    }
    Ok(texts.pop())
}
