use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Local, TimeZone};
use memtree_core::RedbStore;

/// Open an existing database; inspection never creates one.
pub fn open_store(path: &Path) -> Result<RedbStore> {
    if !path.exists() {
        bail!("Database not found: {}", path.display());
    }
    Ok(RedbStore::open(path)?)
}

pub fn format_timestamp(timestamp: i64) -> String {
    let datetime: DateTime<Local> = match Local.timestamp_millis_opt(timestamp).single() {
        Some(dt) => dt,
        None => return "-".to_string(),
    };

    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn preview_text(input: &str, max_len: usize) -> String {
    let flattened = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_len {
        return flattened;
    }

    let mut preview = flattened.chars().take(max_len).collect::<String>();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview_text("User: hi\n\nSystem: hello", 80), "User: hi System: hello");
        assert_eq!(preview_text("abcdef", 3), "abc…");
    }

    #[test]
    fn test_missing_database_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(&dir.path().join("missing.redb")).err().unwrap();
        assert!(err.to_string().contains("Database not found"));
    }
}
