use anyhow::Result;
use comfy_table::Cell;
use memtree_core::memory::sort_stack;
use memtree_core::{RedbStore, Store, SummaryNode};

use crate::commands::utils::{format_timestamp, preview_text};
use crate::output::{OutputFormat, new_table, print_json, print_table};

/// Live nodes in stack order, bottom to top.
pub fn load_stack(store: &RedbStore, chat_id: &str) -> Result<Vec<SummaryNode>> {
    let mut nodes = store.load_stack_snapshot(chat_id)?;
    sort_stack(&mut nodes);
    Ok(nodes)
}

pub fn run(store: &RedbStore, chat_id: &str, format: OutputFormat) -> Result<()> {
    let nodes = load_stack(store, chat_id)?;

    if format.is_json() {
        return print_json(&nodes);
    }

    if nodes.is_empty() {
        println!("No summaries for {chat_id}");
        return Ok(());
    }

    let mut table = new_table(vec!["#", "ID", "Kind", "Index", "Size", "Created", "Summary"]);
    for (position, node) in nodes.iter().enumerate() {
        table.add_row(vec![
            Cell::new(position),
            Cell::new(&node.id),
            Cell::new(node.kind.as_str()),
            Cell::new(node.index),
            Cell::new(node.size),
            Cell::new(format_timestamp(node.created_at)),
            Cell::new(preview_text(&node.summary, 60)),
        ]);
    }
    print_table(table)?;

    let leaves: u64 = nodes.iter().map(|node| node.size).sum();
    println!("{} live nodes covering {} compacted windows", nodes.len(), leaves);
    Ok(())
}
