//! Conversation turns and summary tree nodes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    System,
}

impl Sender {
    pub fn label(self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::System => "System",
        }
    }
}

/// One message exchanged in a conversation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub sender: Sender,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl Turn {
    pub fn new(chat_id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            content: content.into(),
            sender,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn user(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(chat_id, Sender::User, content)
    }

    pub fn system(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(chat_id, Sender::System, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Summary of exactly one compacted window.
    Leaf,
    /// Merge of two equal-size children.
    Node,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Node => "node",
        }
    }
}

/// A node of the summary merge tree.
///
/// Children are referenced by id, never embedded, so a node can be loaded
/// without pulling in its subtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryNode {
    pub id: String,
    pub chat_id: String,
    /// Monotonic per `(chat_id, kind)`; audit and rehydration order only.
    pub index: u64,
    /// Number of leaves covered by this node.
    pub size: u64,
    pub summary: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl SummaryNode {
    pub fn leaf(chat_id: impl Into<String>, index: u64, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            index,
            size: 1,
            summary: summary.into(),
            kind: NodeKind::Leaf,
            left: None,
            right: None,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Parent of two equal-size nodes; `older` becomes the left child.
    pub fn merged(
        older: &SummaryNode,
        newer: &SummaryNode,
        index: u64,
        summary: impl Into<String>,
    ) -> Self {
        debug_assert_eq!(older.size, newer.size);
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: older.chat_id.clone(),
            index,
            size: older.size + newer.size,
            summary: summary.into(),
            kind: NodeKind::Node,
            left: Some(older.id.clone()),
            right: Some(newer.id.clone()),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn children(&self) -> Option<(&str, &str)> {
        match (self.left.as_deref(), self.right.as_deref()) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

/// A leaf together with the raw turns it was compacted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeafRecord {
    pub leaf: SummaryNode,
    pub source_turn_ids: Vec<String>,
}
