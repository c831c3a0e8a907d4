use anyhow::Result;
use comfy_table::Cell;
use memtree_core::RedbStore;
use memtree_core::memory::leaf_records;

use crate::commands::stack::load_stack;
use crate::commands::utils::{format_timestamp, preview_text};
use crate::output::{OutputFormat, new_table, print_json, print_table};

pub fn run(store: &RedbStore, chat_id: &str, format: OutputFormat) -> Result<()> {
    let roots = load_stack(store, chat_id)?;
    let records = leaf_records(store, &roots)?;

    if format.is_json() {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No summaries for {chat_id}");
        return Ok(());
    }

    let mut table = new_table(vec!["Leaf", "Created", "Turns", "Summary"]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.leaf.index),
            Cell::new(format_timestamp(record.leaf.created_at)),
            Cell::new(record.source_turn_ids.join("\n")),
            Cell::new(preview_text(&record.leaf.summary, 60)),
        ]);
    }
    print_table(table)
}
