use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::normalize::decorate;
use super::{page_from_results, page_token, HttpFetcher, PageStream, SourceAdapter};
use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
use crate::errors::AdapterFailure;
use crate::model::{SearchQuery, SearchResult, SourceType};

const API_URL: &str = "https://www.googleapis.com/youtube/v3/search";
/// The Data API refuses larger pages.
const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    channel_title: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// Parse one `search.list` response into results and how the page ended.
pub fn parse_search_response(body: &str) -> Result<(Vec<SearchResult>, PageEnd), AdapterFailure> {
    let response: SearchListResponse = serde_json::from_str(body).map_err(AdapterFailure::malformed)?;

    let results = response
        .items
        .into_iter()
        .filter(|item| item.id.kind == "youtube#video")
        .filter_map(|item| {
            let video_id = item.id.video_id?;
            let snippet = item.snippet?;
            let url = format!("https://www.youtube.com/watch?v={}", video_id);
            let thumbnail = snippet
                .thumbnails
                .high
                .or(snippet.thumbnails.medium)
                .or(snippet.thumbnails.default)
                .map(|t| t.url)
                .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id));

            let mut result = SearchResult::new(url, snippet.title, SourceType::Video)
                .with_thumbnail(thumbnail)
                .with_metadata("videoId", video_id)
                .with_metadata("source", "YouTube");
            if !snippet.description.trim().is_empty() {
                result = result.with_description(snippet.description);
            }
            if let Some(channel) = snippet.channel_title {
                result = result.with_metadata("channel", channel);
            }
            if let Some(published) = snippet.published_at {
                result = result.with_metadata("publishedAt", published);
            }
            Some(decorate(result))
        })
        .collect();

    let end = match response.next_page_token {
        Some(token) if !token.is_empty() => PageEnd::Next { token: Some(token) },
        _ => PageEnd::Exhausted,
    };
    Ok((results, end))
}

/// YouTube Data API v3 search, paginated by `pageToken`.
pub struct YouTubeApiAdapter {
    fetcher: HttpFetcher,
    api_key: String,
    page_size: usize,
}

impl YouTubeApiAdapter {
    pub fn new(fetcher: HttpFetcher, api_key: String, page_size: usize) -> Self {
        Self {
            fetcher,
            api_key,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

#[async_trait]
impl SourceAdapter for YouTubeApiAdapter {
    fn name(&self) -> &str {
        "youtube-api"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Video
    }

    fn first_position(&self) -> CursorPosition {
        CursorPosition::first_token()
    }

    async fn search(
        &self,
        query: &SearchQuery,
        cursor: Option<&PaginationCursor>,
    ) -> Result<PageStream, AdapterFailure> {
        let mut url = format!(
            "{}?part=snippet&type=video&q={}&maxResults={}&key={}",
            API_URL,
            urlencoding::encode(&query.search_terms()),
            self.page_size,
            urlencoding::encode(&self.api_key)
        );
        if let Some(token) = page_token(cursor) {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(&token)));
        }

        let body = self.fetcher.fetch_text(&url).await?;
        let (results, end) = parse_search_response(&body)?;
        debug!("YouTube API page yielded {} results, end {:?}", results.len(), end);
        Ok(page_from_results(results, end))
    }
}
