use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::normalize_tag;

/// Process-wide tag frequency table. Counts only ever grow.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    counts: Arc<RwLock<HashMap<String, u64>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_tags<I>(&self, tags: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let normalized: Vec<String> = tags
            .into_iter()
            .filter_map(|tag| normalize_tag(tag.as_ref()))
            .collect();
        if normalized.is_empty() {
            return;
        }

        let mut counts = self.counts.write().await;
        for tag in normalized {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }

    /// Tags overlapping `query_text` (substring either way, case-insensitive),
    /// most frequent first.
    pub async fn recommend(&self, query_text: &str) -> Vec<String> {
        let needle = query_text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let counts = self.counts.read().await;
        let matching = counts
            .iter()
            .filter(|(tag, _)| tag.contains(&needle) || needle.contains(tag.as_str()));
        rank(matching, usize::MAX)
    }

    pub async fn top_tags(&self, limit: usize) -> Vec<String> {
        let counts = self.counts.read().await;
        rank(counts.iter(), limit)
    }

    pub async fn count(&self, tag: &str) -> u64 {
        let Some(tag) = normalize_tag(tag) else {
            return 0;
        };
        self.counts.read().await.get(&tag).copied().unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.counts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.counts.read().await.is_empty()
    }
}

fn rank<'a>(entries: impl Iterator<Item = (&'a String, &'a u64)>, limit: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, u64)> = entries.map(|(tag, count)| (tag, *count)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(tag, _)| tag.clone())
        .collect()
}
