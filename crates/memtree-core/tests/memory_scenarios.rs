#![cfg(feature = "test-utils")]

//! End-to-end behaviour of the coordinator over the in-memory store:
//! the compaction scenarios, binary-counter stack shape, argument order of
//! pair merges and recovery from deferred merges.

use std::sync::Arc;
use std::time::Duration;

use memtree_core::testing::{Failure, ScriptedSummarizer, numbered_turns};
use memtree_core::{
    CompactionStatus, InMemoryStore, MemoryConfig, MemoryCoordinator, MemoryError, NodeKind,
    RetryConfig, Store,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn no_retry(capacity: usize) -> MemoryConfig {
    MemoryConfig::default()
        .with_window_capacity(capacity)
        .with_retry(RetryConfig::none())
}

fn setup(
    config: MemoryConfig,
) -> (
    MemoryCoordinator,
    Arc<InMemoryStore>,
    Arc<ScriptedSummarizer>,
) {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(ScriptedSummarizer::new());
    let coordinator =
        MemoryCoordinator::new("chat", config, store.clone(), summarizer.clone()).unwrap();
    (coordinator, store, summarizer)
}

async fn insert_all(
    coordinator: &MemoryCoordinator,
    range: std::ops::RangeInclusive<usize>,
) -> Vec<CompactionStatus> {
    let mut statuses = Vec::new();
    for turn in numbered_turns("chat", range) {
        statuses.push(coordinator.insert_turn(turn).await.unwrap());
    }
    statuses
}

/// Number of the first `t<N>` mentioned in a summary.
fn first_turn_number(text: &str) -> usize {
    let start = text.find(": t").map(|i| i + 3).unwrap_or(text.len());
    text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap()
}

fn binary_sizes(count: u64) -> Vec<u64> {
    (0..u64::BITS)
        .rev()
        .map(|bit| 1u64 << bit)
        .filter(|size| count & size != 0)
        .collect()
}

// ---------------------------------------------------------------------------
// Compaction scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_windows_merge_into_one_node() {
    let (coordinator, store, summarizer) = setup(no_retry(2));

    insert_all(&coordinator, 1..=2).await;
    let stack = coordinator.stack_snapshot().await;
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].kind, NodeKind::Leaf);
    assert_eq!(stack[0].size, 1);
    assert!(coordinator.window_turns().await.is_empty());
    let first_leaf = stack[0].clone();

    insert_all(&coordinator, 3..=4).await;
    let stack = coordinator.stack_snapshot().await;
    assert_eq!(stack.len(), 1);
    let root = &stack[0];
    assert_eq!(root.kind, NodeKind::Node);
    assert_eq!(root.size, 2);
    assert_eq!(root.left.as_deref(), Some(first_leaf.id.as_str()));

    let second_leaf = store
        .load_node(root.right.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(second_leaf.size, 1);
    assert_eq!(second_leaf.summary, "S(User: t3\n\nSystem: t4)");
    assert_eq!(
        summarizer.pair_calls(),
        vec![(first_leaf.summary.clone(), second_leaf.summary.clone())]
    );
    assert!(coordinator.window_turns().await.is_empty());
}

#[tokio::test]
async fn failed_merge_keeps_both_leaves_and_clears_window() {
    let (coordinator, store, summarizer) = setup(no_retry(2));
    summarizer.fail_pair_call(1, Failure::Transient);

    insert_all(&coordinator, 1..=2).await;
    let mut statuses = insert_all(&coordinator, 3..=4).await;

    let Some(CompactionStatus::Deferred(err)) = statuses.pop() else {
        panic!("expected deferred compaction");
    };
    let MemoryError::MergeDeferred { leaf_id, source } = &err else {
        panic!("expected deferred merge, got {err:?}");
    };
    assert!(source.is_transient());

    let stack = coordinator.stack_snapshot().await;
    let sizes: Vec<u64> = stack.iter().map(|node| node.size).collect();
    assert_eq!(sizes, vec![1, 1]);
    assert_eq!(stack[0].summary, "S(User: t1\n\nSystem: t2)");
    assert_eq!(&stack[1].id, leaf_id);
    assert!(stack.iter().all(|node| node.kind == NodeKind::Leaf));

    // Leaf creation succeeded, so its window was released
    assert!(coordinator.window_turns().await.is_empty());
    assert!(!store.is_turn_active("t4"));
    assert_eq!(store.node_count("chat"), 2);
    assert_eq!(store.load_stack_snapshot("chat").unwrap().len(), 2);
}

#[tokio::test]
async fn deferred_merge_settles_on_next_compaction() {
    let (coordinator, _, summarizer) = setup(no_retry(2));
    summarizer.fail_pair_call(1, Failure::Malformed);

    insert_all(&coordinator, 1..=4).await;
    assert_eq!(coordinator.stack_snapshot().await.len(), 2);

    let mut statuses = insert_all(&coordinator, 5..=6).await;
    assert!(matches!(
        statuses.pop(),
        Some(CompactionStatus::Compacted(_))
    ));

    let stack = coordinator.stack_snapshot().await;
    let sizes: Vec<u64> = stack.iter().map(|node| node.size).collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(summarizer.pair_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let config = MemoryConfig::default()
        .with_window_capacity(2)
        .with_retry(RetryConfig {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        });
    let (coordinator, _, summarizer) = setup(config);
    summarizer.fail_summarize_call(1, Failure::Transient);
    summarizer.fail_pair_call(1, Failure::Transient);
    summarizer.fail_pair_call(2, Failure::Transient);

    let statuses = insert_all(&coordinator, 1..=4).await;

    assert!(statuses.iter().all(|status| !status.is_deferred()));
    assert_eq!(summarizer.summarize_calls().len(), 3);
    assert_eq!(summarizer.pair_calls().len(), 3);
    assert_eq!(coordinator.stack_snapshot().await[0].size, 2);
}

#[tokio::test(start_paused = true)]
async fn slow_summarizer_times_out_and_keeps_window() {
    let store = Arc::new(InMemoryStore::new());
    let summarizer = Arc::new(ScriptedSummarizer::new().with_delay(Duration::from_secs(120)));
    let coordinator = MemoryCoordinator::new(
        "chat",
        no_retry(2).with_summarizer_timeout_secs(5),
        store,
        summarizer,
    )
    .unwrap();

    let mut statuses = insert_all(&coordinator, 1..=2).await;

    let Some(CompactionStatus::Deferred(err)) = statuses.pop() else {
        panic!("expected deferred compaction");
    };
    assert!(err.is_transient());
    assert_eq!(coordinator.window_turns().await.len(), 2);
    assert!(coordinator.stack_snapshot().await.is_empty());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stack_sizes_match_binary_leaf_count() {
    let (coordinator, _, _) = setup(no_retry(1));

    for count in 1..=40u64 {
        let n = count as usize;
        insert_all(&coordinator, n..=n).await;
        let sizes: Vec<u64> = coordinator
            .stack_snapshot()
            .await
            .iter()
            .map(|node| node.size)
            .collect();
        assert_eq!(sizes, binary_sizes(count), "after {count} leaves");
        assert!(sizes.len() <= (count.ilog2() + 1) as usize);
    }
}

#[tokio::test]
async fn pair_merges_are_always_older_first() {
    let (coordinator, _, summarizer) = setup(no_retry(1));
    insert_all(&coordinator, 1..=23).await;

    let calls = summarizer.pair_calls();
    assert!(!calls.is_empty());
    for (older, newer) in calls {
        assert!(
            first_turn_number(&older) < first_turn_number(&newer),
            "{older} merged after {newer}"
        );
    }
}

#[tokio::test]
async fn full_summary_leaves_stack_untouched() {
    let (coordinator, store, _) = setup(no_retry(2));
    insert_all(&coordinator, 1..=10).await;

    let before = coordinator.stack_snapshot().await;
    let nodes_before = store.node_count("chat");

    let first = coordinator.generate_full_summary().await.unwrap();
    let second = coordinator.generate_full_summary().await.unwrap();

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(coordinator.stack_snapshot().await, before);
    assert_eq!(store.node_count("chat"), nodes_before);
    assert_eq!(store.load_stack_snapshot("chat").unwrap().len(), before.len());
}

#[tokio::test]
async fn reconstruct_covers_every_compacted_turn_in_order() {
    let (coordinator, store, _) = setup(no_retry(3));
    insert_all(&coordinator, 1..=20).await;

    let compacted: Vec<String> = coordinator
        .reconstruct()
        .await
        .unwrap()
        .into_iter()
        .flat_map(|record| record.source_turn_ids)
        .collect();
    let expected: Vec<String> = (1..=18).map(|n| format!("t{n}")).collect();
    assert_eq!(compacted, expected);

    let held: Vec<String> = coordinator
        .window_turns()
        .await
        .into_iter()
        .map(|turn| turn.id)
        .collect();
    assert_eq!(held, vec!["t19", "t20"]);
    assert_eq!(store.load_all_turns("chat").unwrap().len(), 20);
}
