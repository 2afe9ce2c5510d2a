use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{RemoteFiles, VideoMetadata};
use crate::storage::{LocalStore, StorageResult};

pub const HISTORY_KEY: &str = "conversionHistory";
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub url: String,
    pub video_info: VideoMetadata,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    #[serde(default)]
    pub files: RemoteFiles,
}

/// Completed conversions, newest first, capped at `limit` entries.
#[derive(Debug)]
pub struct HistoryStore {
    store: LocalStore,
    limit: usize,
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn load(store: LocalStore, limit: usize) -> Self {
        let limit = limit.max(1);
        let mut entries = read_entries(&store);
        entries.truncate(limit);
        Self {
            store,
            limit,
            entries,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `entry` as the newest conversion. Memory is left untouched when
    /// the list cannot be persisted.
    pub fn append(&mut self, entry: HistoryEntry) -> StorageResult<()> {
        info!(task_id = %entry.task_id, url = %entry.url, "recording conversion in history");
        let mut next = Vec::with_capacity(self.limit);
        next.push(entry);
        next.extend(self.entries.iter().take(self.limit - 1).cloned());
        self.commit(next)
    }

    pub fn clear(&mut self) -> StorageResult<()> {
        self.commit(Vec::new())
    }

    fn commit(&mut self, entries: Vec<HistoryEntry>) -> StorageResult<()> {
        self.store.set(HISTORY_KEY, &entries)?;
        self.entries = entries;
        Ok(())
    }
}

/// Loads the persisted list, skipping records that no longer decode.
fn read_entries(store: &LocalStore) -> Vec<HistoryEntry> {
    let Some(value) = store.get::<Value>(HISTORY_KEY) else {
        return Vec::new();
    };
    let Value::Array(items) = value else {
        warn!("stored history is not a list, starting empty");
        return Vec::new();
    };
    let total = items.len();
    let entries: Vec<HistoryEntry> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if entries.len() < total {
        warn!(
            skipped = total - entries.len(),
            "ignoring malformed history records"
        );
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            url: format!("https://youtu.be/video{n:06}"),
            video_info: VideoMetadata::placeholder(None),
            timestamp: Utc::now(),
            task_id: format!("task-{n}"),
            files: RemoteFiles::new(),
        }
    }

    #[test]
    fn keeps_the_most_recent_fifty() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let mut history = HistoryStore::load(store.clone(), DEFAULT_HISTORY_LIMIT);
        for n in 0..51 {
            history.append(entry(n)).unwrap();
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.entries()[0].task_id, "task-50");
        assert_eq!(history.entries()[49].task_id, "task-1");

        let reloaded = HistoryStore::load(store, DEFAULT_HISTORY_LIMIT);
        assert_eq!(reloaded.len(), 50);
        assert_eq!(reloaded.get(0).unwrap().task_id, "task-50");
    }

    #[test]
    fn corrupted_state_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let path = dir.path().join(format!("{HISTORY_KEY}.json"));

        fs::write(&path, "][").unwrap();
        assert!(HistoryStore::load(store.clone(), 50).is_empty());

        fs::write(&path, r#"{"url": "not a list"}"#).unwrap();
        assert!(HistoryStore::load(store.clone(), 50).is_empty());

        fs::write(&path, r#"[42, "junk"]"#).unwrap();
        assert!(HistoryStore::load(store, 50).is_empty());
    }

    #[test]
    fn clear_persists_an_empty_list() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let mut history = HistoryStore::load(store.clone(), 50);
        history.append(entry(1)).unwrap();
        history.clear().unwrap();
        assert!(history.is_empty());
        assert!(HistoryStore::load(store, 50).is_empty());
    }

    #[test]
    fn failed_persist_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        let mut history = HistoryStore::load(LocalStore::open(&store_dir).unwrap(), 50);
        history.append(entry(1)).unwrap();

        fs::remove_dir_all(&store_dir).unwrap();
        assert!(history.append(entry(2)).is_err());
        assert!(history.clear().is_err());
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].task_id, "task-1");
    }
}
