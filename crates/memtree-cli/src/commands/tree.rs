use anyhow::Result;
use memtree_core::memory::{TreeEntry, walk_tree};
use memtree_core::{NodeKind, RedbStore};

use crate::commands::stack::load_stack;
use crate::commands::utils::preview_text;
use crate::output::{OutputFormat, print_json};

pub fn run(store: &RedbStore, chat_id: &str, format: OutputFormat) -> Result<()> {
    let mut trees: Vec<Vec<TreeEntry>> = Vec::new();
    for root in load_stack(store, chat_id)? {
        trees.push(walk_tree(store, &root)?);
    }

    if format.is_json() {
        return print_json(&trees);
    }

    if trees.is_empty() {
        println!("No summaries for {chat_id}");
        return Ok(());
    }

    for entry in trees.iter().flatten() {
        let indent = "  ".repeat(entry.depth);
        let label = match entry.node.kind {
            NodeKind::Leaf => format!("leaf #{}", entry.node.index),
            NodeKind::Node => format!("node #{} (size {})", entry.node.index, entry.node.size),
        };
        println!(
            "{indent}{label}: {}",
            preview_text(&entry.node.summary, 72usize.saturating_sub(indent.len()))
        );
    }
    Ok(())
}
