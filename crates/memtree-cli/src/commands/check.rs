use std::collections::HashSet;

use anyhow::{Result, bail};
use memtree_core::RedbStore;
use serde_json::json;

use crate::commands::stack::load_stack;
use crate::output::{OutputFormat, print_json};

/// Fails if two live nodes share a size. Such a stack is repaired the next
/// time the conversation is loaded by a coordinator.
pub fn run(store: &RedbStore, chat_id: &str, format: OutputFormat) -> Result<()> {
    let sizes: Vec<u64> = load_stack(store, chat_id)?
        .iter()
        .map(|node| node.size)
        .collect();
    let mut seen = HashSet::new();
    let consolidated = sizes.iter().all(|size| seen.insert(*size));

    if format.is_json() {
        print_json(&json!({
            "chat_id": chat_id,
            "sizes": sizes,
            "consolidated": consolidated,
        }))?;
    } else {
        println!("Stack sizes: {sizes:?}");
    }

    if !consolidated {
        bail!("Live stack of {chat_id} repeats a size and needs repair");
    }
    if !format.is_json() {
        println!("Stack is consolidated");
    }
    Ok(())
}
