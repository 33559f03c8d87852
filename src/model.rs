use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Kind of result producer a query is fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[serde(alias = "videos")]
    Video,
    #[serde(alias = "websites")]
    Website,
}

impl SourceType {
    pub const ALL: [SourceType; 2] = [SourceType::Video, SourceType::Website];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Video => "video",
            SourceType::Website => "website",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video" | "videos" => Ok(SourceType::Video),
            "website" | "websites" | "web" => Ok(SourceType::Website),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// Normalise a tag for storage: trimmed and lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub text: String,
    pub source_types: BTreeSet<SourceType>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl SearchQuery {
    pub fn new<I, T>(text: impl Into<String>, source_types: I, tags: T) -> Self
    where
        I: IntoIterator<Item = SourceType>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            text: text.into().trim().to_string(),
            source_types: source_types.into_iter().collect(),
            tags: tags
                .into_iter()
                .filter_map(|t| normalize_tag(t.as_ref()))
                .collect(),
        }
    }

    /// Query text refined by the selected tags, as sent to providers.
    pub fn search_terms(&self) -> String {
        let mut terms = self.text.clone();
        for tag in &self.tags {
            if !self.text.to_lowercase().contains(tag.as_str()) {
                terms.push(' ');
                terms.push_str(tag);
            }
        }
        terms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub source_metadata: BTreeMap<String, String>,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: None,
            source_type,
            thumbnail_url: None,
            tags: BTreeSet::new(),
            source_metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        if let Some(tag) = normalize_tag(tag) {
            self.tags.insert(tag);
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source_metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Started,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum AdapterState {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl AdapterState {
    pub fn is_settled(&self) -> bool {
        matches!(self, AdapterState::Completed | AdapterState::Failed(_))
    }
}

/// Point-in-time view of a session. The live session is owned by the coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSession {
    pub id: SessionId,
    pub query: SearchQuery,
    pub state: SessionState,
    pub result_count: usize,
    pub started_at: DateTime<Utc>,
    pub adapter_states: BTreeMap<SourceType, AdapterState>,
}

/// Events carried by the result channel for one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    SessionStarted {
        query: SearchQuery,
    },
    ResultProduced {
        result: SearchResult,
    },
    /// Published after each explicitly requested page.
    PageDelivered {
        source_type: SourceType,
        delivered: usize,
        total: usize,
        exhausted: bool,
    },
    SessionCompleted {
        total: usize,
    },
    SessionFailed {
        reason: String,
    },
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchEvent::SessionCompleted { .. } | SearchEvent::SessionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalizes_text_and_tags() {
        let query = SearchQuery::new("  cats ", [SourceType::Video], ["Funny", " ", "funny", "Kittens "]);
        assert_eq!(query.text, "cats");
        assert_eq!(
            query.tags.iter().cloned().collect::<Vec<_>>(),
            vec!["funny".to_string(), "kittens".to_string()]
        );
    }

    #[test]
    fn search_terms_append_tags_not_in_text() {
        let query = SearchQuery::new("funny cats", [SourceType::Video], ["cats", "compilation"]);
        assert_eq!(query.search_terms(), "funny cats compilation");
    }

    #[test]
    fn source_type_accepts_plural_aliases() {
        let parsed: Vec<SourceType> = serde_json::from_str(r#"["videos", "website"]"#).unwrap();
        assert_eq!(parsed, vec![SourceType::Video, SourceType::Website]);
        assert_eq!("Websites".parse::<SourceType>().unwrap(), SourceType::Website);
        assert!("images".parse::<SourceType>().is_err());
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = SearchResult::new("https://a", "A", SourceType::Video)
            .with_thumbnail("https://a/t.jpg")
            .with_metadata("duration", "3:10");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["thumbnailUrl"], "https://a/t.jpg");
        assert_eq!(value["sourceType"], "video");
        assert_eq!(value["sourceMetadata"]["duration"], "3:10");
        assert!(value.get("description").is_none());
    }
}
