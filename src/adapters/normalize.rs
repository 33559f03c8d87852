//! Mapping of the loosely shaped records external producers emit onto
//! `SearchResult`.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::model::{SearchResult, SourceType};

/// Result record as emitted by scrapers. Every field is optional; unknown
/// scalar fields end up in `source_metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawResult {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "thumbnailUrl", alias = "thumbnail_url")]
    pub thumbnail: Option<String>,
    #[serde(rename = "type", alias = "sourceType", alias = "source_type")]
    pub kind: Option<String>,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Fields carried over into `source_metadata` even when empty-ish values are
/// filtered out elsewhere.
const KNOWN_METADATA: [&str; 7] = ["duration", "views", "platform", "source", "favicon", "embed", "channel"];

pub fn normalize(raw: RawResult, default_type: SourceType) -> Option<SearchResult> {
    let url = raw.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())?;
    let source_type = raw
        .kind
        .as_deref()
        .and_then(|kind| kind.parse::<SourceType>().ok())
        .unwrap_or(default_type);
    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| match source_type {
            SourceType::Video => "Untitled Video".to_string(),
            SourceType::Website => url.clone(),
        });

    let mut result = SearchResult::new(url, title, source_type);
    if let Some(description) = raw.description.filter(|d| !d.trim().is_empty()) {
        result = result.with_description(description.trim());
    }
    if let Some(thumbnail) = raw.thumbnail.filter(|t| !t.trim().is_empty()) {
        result = result.with_thumbnail(thumbnail.trim());
    }
    for tag in &raw.tags {
        result = result.with_tag(tag);
    }

    for (key, value) in raw.extra {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        if text.trim().is_empty() || (!KNOWN_METADATA.contains(&key.as_str()) && text.len() > 512) {
            continue;
        }
        result = result.with_metadata(key, text);
    }

    Some(decorate(result))
}

/// Attach platform tag and embed URL derived from the result URL.
pub fn decorate(mut result: SearchResult) -> SearchResult {
    if let Some(platform) = video_platform(&result.url) {
        result = result.with_tag(platform);
        if !result.source_metadata.contains_key("platform") {
            result = result.with_metadata("platform", platform);
        }
    }
    if !result.source_metadata.contains_key("embedUrl") {
        if let Some(embed) = embed_url(&result.url) {
            result = result.with_metadata("embedUrl", embed);
        }
    }
    if let Some(domain) = domain(&result.url) {
        if !result.source_metadata.contains_key("domain") {
            result = result.with_metadata("domain", domain);
        }
    }
    result
}

pub fn domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .host_str()
        .map(|host| host.trim_start_matches("www.").to_string())
}

pub fn video_platform(url: &str) -> Option<&'static str> {
    let host = domain(url)?;
    if host == "youtu.be" || host.ends_with("youtube.com") {
        Some("youtube")
    } else if host.ends_with("vimeo.com") {
        Some("vimeo")
    } else if host.ends_with("dailymotion.com") {
        Some("dailymotion")
    } else {
        None
    }
}

/// Player URL for the video hosts that allow embedding.
pub fn embed_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());

    match host {
        "youtube.com" => {
            let id = parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())?;
            Some(format!("https://www.youtube.com/embed/{}", id))
        }
        "youtu.be" => segments
            .next()
            .map(|id| format!("https://www.youtube.com/embed/{}", id)),
        "vimeo.com" => segments
            .next()
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .map(|id| format!("https://player.vimeo.com/video/{}", id)),
        "dailymotion.com" => match (segments.next(), segments.next()) {
            (Some("video"), Some(id)) => Some(format!("https://www.dailymotion.com/embed/video/{}", id)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn maps_prototype_video_shape() {
        let result = normalize(
            raw(json!({
                "url": "https://www.youtube.com/watch?v=abc123",
                "title": "Cats",
                "description": "Watch this video on YouTube: Cats",
                "thumbnail": "https://i.ytimg.com/vi/abc123/hqdefault.jpg",
                "duration": "3:10",
                "views": "1.2M views",
                "platform": "YouTube",
                "type": "video",
                "nested": {"ignored": true}
            })),
            SourceType::Website,
        )
        .unwrap();

        assert_eq!(result.source_type, SourceType::Video);
        assert_eq!(result.thumbnail_url.as_deref(), Some("https://i.ytimg.com/vi/abc123/hqdefault.jpg"));
        assert_eq!(result.source_metadata["duration"], "3:10");
        assert_eq!(result.source_metadata["views"], "1.2M views");
        assert_eq!(result.source_metadata["platform"], "YouTube");
        assert_eq!(result.source_metadata["embedUrl"], "https://www.youtube.com/embed/abc123");
        assert!(!result.source_metadata.contains_key("nested"));
        assert!(result.tags.contains("youtube"));
    }

    #[test]
    fn skips_records_without_url() {
        assert!(normalize(raw(json!({"title": "no link"})), SourceType::Video).is_none());
        assert!(normalize(raw(json!({"url": "   "})), SourceType::Video).is_none());
    }

    #[test]
    fn website_without_title_uses_url() {
        let result = normalize(raw(json!({"url": "https://example.com/page", "favicon": "https://example.com/favicon.ico"})), SourceType::Website).unwrap();
        assert_eq!(result.title, "https://example.com/page");
        assert_eq!(result.source_metadata["favicon"], "https://example.com/favicon.ico");
        assert_eq!(result.source_metadata["domain"], "example.com");
    }

    #[test]
    fn embed_urls_for_known_hosts() {
        assert_eq!(
            embed_url("https://youtu.be/xyz?t=3").as_deref(),
            Some("https://www.youtube.com/embed/xyz")
        );
        assert_eq!(
            embed_url("https://vimeo.com/76979871").as_deref(),
            Some("https://player.vimeo.com/video/76979871")
        );
        assert_eq!(
            embed_url("https://www.dailymotion.com/video/x7tgad0").as_deref(),
            Some("https://www.dailymotion.com/embed/video/x7tgad0")
        );
        assert_eq!(embed_url("https://example.com/watch?v=1"), None);
    }
}
