//! Walking the merge tree down to leaves and their source turns.

use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::model::{LeafRecord, SummaryNode};
use crate::store::Store;

/// A node reached while walking a merge tree, with its distance from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub depth: usize,
    pub node: SummaryNode,
}

/// Pre-order walk of the subtree under `root`, older child first.
pub fn walk_tree(store: &dyn Store, root: &SummaryNode) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pending = vec![TreeEntry {
        depth: 0,
        node: root.clone(),
    }];

    while let Some(entry) = pending.pop() {
        if let Some((left, right)) = entry.node.children() {
            let left = load_child(store, &entry.node, left)?;
            let right = load_child(store, &entry.node, right)?;
            pending.push(TreeEntry {
                depth: entry.depth + 1,
                node: right,
            });
            pending.push(TreeEntry {
                depth: entry.depth + 1,
                node: left,
            });
        } else if !entry.node.is_leaf() {
            return Err(MemoryError::Consistency(format!(
                "Summary node {} has no children",
                entry.node.id
            )));
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Every leaf under `roots` in chronological order, with its source turn ids.
///
/// `roots` must be ordered bottom to top, as returned by a stack snapshot.
pub fn leaf_records(store: &dyn Store, roots: &[SummaryNode]) -> Result<Vec<LeafRecord>> {
    let mut records = Vec::new();
    for root in roots {
        for entry in walk_tree(store, root)? {
            if entry.node.is_leaf() {
                let source_turn_ids = store.source_turn_ids(&entry.node.id)?;
                records.push(LeafRecord {
                    leaf: entry.node,
                    source_turn_ids,
                });
            }
        }
    }
    Ok(records)
}

/// The most recent leaf under `top`, found by following newer children.
pub fn newest_leaf(store: &dyn Store, top: &SummaryNode) -> Result<SummaryNode> {
    let mut node = top.clone();
    while let Some((_, newer)) = node.children() {
        let child = load_child(store, &node, newer)?;
        node = child;
    }
    if !node.is_leaf() {
        return Err(MemoryError::Consistency(format!(
            "Summary node {} has no children",
            node.id
        )));
    }
    Ok(node)
}

fn load_child(store: &dyn Store, parent: &SummaryNode, child_id: &str) -> Result<SummaryNode> {
    store.load_node(child_id)?.ok_or_else(|| {
        MemoryError::Consistency(format!(
            "Summary node {} references missing child {}",
            parent.id, child_id
        ))
    })
}
