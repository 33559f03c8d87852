use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{SearchQuery, SourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub query: String,
    pub source_types: BTreeSet<SourceType>,
    pub searched_at: DateTime<Utc>,
}

/// Bounded record of accepted queries, optionally mirrored to a JSON file
/// so it survives restarts.
#[derive(Debug, Clone)]
pub struct SearchHistory {
    entries: Arc<RwLock<VecDeque<HistoryEntry>>>,
    max_entries: usize,
    file_path: Option<PathBuf>,
}

impl SearchHistory {
    /// Memory only.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
            file_path: None,
        }
    }

    /// Back the history with `path`, starting from what it already holds.
    /// A missing or unreadable file starts an empty history.
    pub fn load(path: PathBuf, max_entries: usize) -> Self {
        let mut entries = match Self::load_from_file(&path) {
            Ok(entries) => {
                debug!("Loaded {} history entries from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                if path.exists() {
                    warn!("Ignoring unreadable search history {}: {}", path.display(), e);
                }
                VecDeque::new()
            }
        };
        while entries.len() > max_entries {
            entries.pop_front();
        }

        Self {
            entries: Arc::new(RwLock::new(entries)),
            max_entries,
            file_path: Some(path),
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn load_from_file(path: &Path) -> Result<VecDeque<HistoryEntry>, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let entries: VecDeque<HistoryEntry> = serde_json::from_str(&content)?;
        Ok(entries)
    }

    fn save_to_file(path: &Path, entries: &VecDeque<HistoryEntry>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub async fn record(&self, query: &SearchQuery) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.push_back(HistoryEntry {
            query: query.text.clone(),
            source_types: query.source_types.clone(),
            searched_at: Utc::now(),
        });

        // Keep only the last max_entries
        while entries.len() > self.max_entries {
            entries.pop_front();
        }

        // written under the lock so concurrent records land in order
        if let Some(path) = &self.file_path {
            if let Err(e) = Self::save_to_file(path, &entries) {
                warn!("Failed to save search history to {}: {}", path.display(), e);
            }
        }
    }

    /// Newest first.
    pub async fn recent(&self, count: usize) -> Vec<HistoryEntry> {
        self.entries.read().await.iter().rev().take(count).cloned().collect()
    }

    pub async fn search(&self, text: &str, limit: usize) -> Vec<HistoryEntry> {
        let needle = text.to_lowercase();
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| entry.query.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn query(text: &str) -> SearchQuery {
        SearchQuery::new(text, [SourceType::Video], Vec::<String>::new())
    }

    #[tokio::test]
    async fn keeps_only_the_newest_entries() {
        let history = SearchHistory::new(2);
        for text in ["one", "two", "three"] {
            history.record(&query(text)).await;
        }
        let recent: Vec<_> = history.recent(10).await.into_iter().map(|e| e.query).collect();
        assert_eq!(recent, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let history = SearchHistory::new(10);
        history.record(&query("Rust async")).await;
        history.record(&query("cooking")).await;
        let hits = history.search("ASYNC", 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].query, "Rust async");
    }

    #[tokio::test]
    async fn persisted_history_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let history = SearchHistory::load(path.clone(), 2);
        for text in ["one", "two", "three"] {
            history.record(&query(text)).await;
        }
        assert!(path.exists());

        let reloaded = SearchHistory::load(path.clone(), 2);
        assert_eq!(reloaded.recent(10).await, history.recent(10).await);
        assert_eq!(reloaded.search("two", 5).await.len(), 1);
        assert_eq!(reloaded.file_path(), Some(path.as_path()));

        // a smaller limit trims the oldest entries on load
        let trimmed = SearchHistory::load(path, 1);
        let recent: Vec<_> = trimmed.recent(10).await.into_iter().map(|e| e.query).collect();
        assert_eq!(recent, vec!["three"]);
    }

    #[tokio::test]
    async fn corrupt_history_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let history = SearchHistory::load(path.clone(), 10);
        assert!(history.recent(10).await.is_empty());
        history.record(&query("fresh")).await;
        assert_eq!(SearchHistory::load(path, 10).recent(1).await[0].query, "fresh");
    }
}
