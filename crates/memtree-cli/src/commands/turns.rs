use anyhow::Result;
use comfy_table::Cell;
use memtree_core::{RedbStore, Store, Turn};
use serde::Serialize;

use crate::cli::TurnsArgs;
use crate::commands::utils::{format_timestamp, preview_text};
use crate::output::{OutputFormat, new_table, print_json, print_table};

#[derive(Serialize)]
struct TurnRow {
    #[serde(flatten)]
    turn: Turn,
    active: bool,
}

pub fn run(store: &RedbStore, args: TurnsArgs, format: OutputFormat) -> Result<()> {
    let rows = if args.all {
        store
            .load_all_turns(&args.chat_id)?
            .into_iter()
            .map(|turn| {
                let active = store.is_turn_active(&turn.id)?;
                Ok(TurnRow { turn, active })
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        store
            .load_recent_turns(&args.chat_id, usize::MAX)?
            .into_iter()
            .map(|turn| TurnRow { turn, active: true })
            .collect()
    };

    if format.is_json() {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("No turns for {}", args.chat_id);
        return Ok(());
    }

    let mut table = new_table(vec!["ID", "Sender", "Created", "Window", "Content"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(&row.turn.id),
            Cell::new(row.turn.sender.label()),
            Cell::new(format_timestamp(row.turn.created_at)),
            Cell::new(if row.active { "held" } else { "evicted" }),
            Cell::new(preview_text(&row.turn.content, 60)),
        ]);
    }
    print_table(table)
}
