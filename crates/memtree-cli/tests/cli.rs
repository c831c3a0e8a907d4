use std::path::Path;

use assert_cmd::Command;
use memtree_core::{RedbStore, Store, StoreOp, SummaryNode, Turn};
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn memtree() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("memtree"));
    cmd.env_remove("MEMTREE_DB_PATH").env_remove("RUST_LOG");
    cmd
}

fn push(store: &RedbStore, node: &SummaryNode, ops: Vec<StoreOp>) {
    let mut all = vec![StoreOp::CreateSummaryNode(node.clone())];
    all.extend(ops);
    store.run_transaction(all).unwrap();
}

fn live(node: &SummaryNode) -> StoreOp {
    StoreOp::PushStack {
        chat_id: "chat".to_string(),
        node_id: node.id.clone(),
    }
}

fn retire(node: &SummaryNode) -> StoreOp {
    StoreOp::PopStack {
        chat_id: "chat".to_string(),
        node_id: node.id.clone(),
    }
}

fn links(node: &SummaryNode, turns: &[&str]) -> StoreOp {
    StoreOp::LinkSourceTurns {
        summary_id: node.id.clone(),
        turn_ids: turns.iter().map(|id| id.to_string()).collect(),
    }
}

/// Two compacted windows merged into one node, a third leaf and one held turn.
fn seed(path: &Path, consolidated: bool) {
    let store = RedbStore::open(path).unwrap();
    for n in 1..=7 {
        let turn = if n % 2 == 1 {
            Turn::user("chat", format!("question {n}"))
        } else {
            Turn::system("chat", format!("answer {n}"))
        };
        store.append_turn(&turn.with_id(format!("t{n}"))).unwrap();
        if n < 7 {
            store.mark_turn_evicted(&format!("t{n}")).unwrap();
        }
    }

    let first = SummaryNode::leaf("chat", 0, "first window");
    let second = SummaryNode::leaf("chat", 1, "second window");
    let third = SummaryNode::leaf("chat", 2, "third window");
    push(&store, &first, vec![links(&first, &["t1", "t2"]), live(&first)]);
    push(&store, &second, vec![links(&second, &["t3", "t4"]), live(&second)]);
    if consolidated {
        let parent = SummaryNode::merged(&first, &second, 0, "first and second");
        push(&store, &parent, vec![retire(&first), retire(&second), live(&parent)]);
    }
    push(&store, &third, vec![links(&third, &["t5", "t6"]), live(&third)]);
}

fn seeded(consolidated: bool) -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.redb");
    seed(&path, consolidated);
    (dir, path.display().to_string())
}

#[test]
fn test_cli_help() {
    memtree()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("memtree"));
}

#[test]
fn test_cli_version() {
    memtree().arg("--version").assert().success();
}

#[test]
fn test_missing_database_fails() {
    let dir = tempfile::tempdir().unwrap();
    memtree()
        .args(["--db-path", &dir.path().join("none.redb").display().to_string()])
        .args(["stack", "chat"])
        .assert()
        .failure()
        .stderr(contains("Database not found"));
}

#[test]
fn test_turns_lists_held_window() {
    let (_dir, db) = seeded(true);
    memtree()
        .args(["--db-path", &db, "turns", "chat"])
        .assert()
        .success()
        .stdout(contains("t7"))
        .stdout(contains("question 7"))
        .stdout(contains("answer 6").not());
}

#[test]
fn test_turns_all_marks_evicted() {
    let (_dir, db) = seeded(true);
    memtree()
        .args(["--db-path", &db, "turns", "chat", "--all"])
        .assert()
        .success()
        .stdout(contains("evicted"))
        .stdout(contains("answer 6"));
}

#[test]
fn test_stack_json_is_bottom_to_top() {
    let (_dir, db) = seeded(true);
    let output = memtree()
        .args(["--db-path", &db, "--format", "json", "stack", "chat"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let nodes: Vec<SummaryNode> = serde_json::from_slice(&output.stdout).unwrap();
    let sizes: Vec<u64> = nodes.iter().map(|node| node.size).collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(nodes[0].summary, "first and second");
}

#[test]
fn test_tree_shows_children() {
    let (_dir, db) = seeded(true);
    memtree()
        .args(["--db-path", &db, "tree", "chat"])
        .assert()
        .success()
        .stdout(contains("node #0 (size 2): first and second"))
        .stdout(contains("  leaf #0: first window"))
        .stdout(contains("leaf #2: third window"));
}

#[test]
fn test_lineage_json_lists_source_turns() {
    let (_dir, db) = seeded(true);
    let output = memtree()
        .args(["--db-path", &db, "--format", "json", "lineage", "chat"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let sources: Vec<Vec<String>> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|record| serde_json::from_value(record["source_turn_ids"].clone()).unwrap())
        .collect();
    assert_eq!(
        sources,
        vec![vec!["t1", "t2"], vec!["t3", "t4"], vec!["t5", "t6"]]
    );
}

#[test]
fn test_check_reports_inconsistent_stack() {
    let (_dir, db) = seeded(true);
    memtree()
        .args(["--db-path", &db, "check", "chat"])
        .assert()
        .success()
        .stdout(contains("consolidated"));

    let (_dir, db) = seeded(false);
    memtree()
        .args(["--db-path", &db, "check", "chat"])
        .assert()
        .failure()
        .stderr(contains("needs repair"));
}
