//! Range query helpers for prefix scans.

use anyhow::{Result, bail};

/// Separator between the segments of a composite string key.
pub const KEY_SEPARATOR: char = ':';

/// Check that an id can be used as a key segment.
///
/// A segment containing the separator would make one chat's prefix scan
/// match keys of another (`team` would also match `team:ops`).
pub fn ensure_key_segment(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{} must not be empty", label);
    }
    if value.contains(KEY_SEPARATOR) {
        bail!("{} {:?} must not contain '{}'", label, value, KEY_SEPARATOR);
    }
    Ok(())
}

/// Calculate the exclusive end bound for a prefix range query.
///
/// Given prefix "chat-001:", returns "chat-001;" (next ASCII char after ':').
/// This allows efficient range scans: range(prefix..end_prefix)
pub fn prefix_end_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }

    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.saturating_add(1);
    }

    String::from_utf8(bytes).unwrap_or_else(|_| format!("{}\x7F", prefix))
}

/// Create a prefix range for redb queries.
pub fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), prefix_end_bound(prefix))
}

/// Zero-padded sequence key so lexicographic order matches numeric order.
pub fn seq_key(prefix: &str, seq: u64) -> String {
    format!("{}:{:020}", prefix, seq)
}
