//! Request/response handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::cursor::CursorPosition;
use crate::errors::{LocalSearchError, SearchError};
use crate::model::{SearchQuery, SessionId, SourceType};

const DEFAULT_TOP_TAGS: usize = 20;
const DEFAULT_HISTORY: usize = 50;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        let status = match &err {
            SearchError::InvalidQuery { .. } | SearchError::SourceNotSelected { .. } => StatusCode::BAD_REQUEST,
            SearchError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            SearchError::SessionBusy { .. } => StatusCode::CONFLICT,
            SearchError::SourceExhausted { .. } | SearchError::SessionClosed { .. } => StatusCode::GONE,
            SearchError::Adapter { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<LocalSearchError> for ApiError {
    fn from(err: LocalSearchError) -> Self {
        let status = match &err {
            LocalSearchError::OutsideRoot { .. } => StatusCode::FORBIDDEN,
            LocalSearchError::NotADirectory { .. } => StatusCode::NOT_FOUND,
            LocalSearchError::Walk(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "status": "error", "error": self.message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVideosParams {
    pub query: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub page_token: Option<String>,
    /// `video` (default) or `website`.
    #[serde(rename = "type")]
    pub source_type: Option<SourceType>,
    /// Comma separated.
    pub tags: Option<String>,
}

impl SearchVideosParams {
    fn position(&self, default_limit: usize) -> Result<Option<CursorPosition>, ApiError> {
        if let Some(token) = self.page_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Some(CursorPosition::Token {
                token: Some(token.clone()),
            }));
        }
        if self.page.is_none() && self.limit.is_none() {
            return Ok(None);
        }
        let limit = self.limit.unwrap_or(default_limit).max(1);
        let page = self.page.unwrap_or(1).max(1);
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| ApiError::validation(format!("page {} with limit {} is out of range", page, limit)))?;
        Ok(Some(CursorPosition::Offset {
            offset,
            page_size: limit,
        }))
    }
}

/// GET /search_videos
pub async fn search_videos(
    State(state): State<AppState>,
    Query(params): Query<SearchVideosParams>,
) -> Result<Json<Value>, ApiError> {
    let text = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::validation("query is required"))?;
    let source_type = params.source_type.unwrap_or(SourceType::Video);
    let tags: Vec<&str> = params
        .tags
        .as_deref()
        .map(|tags| tags.split(',').collect())
        .unwrap_or_default();
    let query = SearchQuery::new(text, [source_type], tags);
    let position = params.position(state.config.page_size)?;
    debug!("search_videos '{}' {} at {:?}", text, source_type, position);

    let page = state
        .coordinator
        .fetch_stateless(query, source_type, position)
        .await?;

    let mut body = json!({
        "results": page.results,
        "count": page.results.len(),
    });
    if let CursorPosition::Token { token } = &page.next.position {
        let next = if page.next.is_exhausted() { None } else { token.clone() };
        body["nextPageToken"] = json!(next);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct RecommendParams {
    #[serde(default)]
    pub query: String,
}

/// GET /tags/recommend
pub async fn recommend_tags(State(state): State<AppState>, Query(params): Query<RecommendParams>) -> Json<Value> {
    let tags = state.coordinator.tags().recommend(&params.query).await;
    Json(json!({ "tags": tags }))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
    pub q: Option<String>,
}

/// GET /tags/top
pub async fn top_tags(State(state): State<AppState>, Query(params): Query<LimitParams>) -> Json<Value> {
    let tags = state
        .coordinator
        .tags()
        .top_tags(params.limit.unwrap_or(DEFAULT_TOP_TAGS))
        .await;
    Json(json!({ "tags": tags }))
}

/// GET /search_history
pub async fn search_history(State(state): State<AppState>, Query(params): Query<LimitParams>) -> Json<Value> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY);
    let history = match params.q.as_deref().filter(|q| !q.trim().is_empty()) {
        Some(text) => state.coordinator.history().search(text, limit).await,
        None => state.coordinator.history().recent(limit).await,
    };
    Json(json!({ "history": history }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LocalSearchParams {
    pub base_directory: Option<String>,
    pub query: Option<String>,
}

fn display_paths(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths.iter().map(|path| path.display().to_string()).collect()
}

/// GET /search_directories: every local video file under the directory.
pub async fn search_directories(
    State(state): State<AppState>,
    Query(params): Query<LocalSearchParams>,
) -> Result<Json<Value>, ApiError> {
    let found = state.local.find(params.base_directory, None).await?;
    Ok(Json(json!({ "results": display_paths(&found) })))
}

/// GET /advanced_search: local video files whose name contains the query.
pub async fn advanced_search(
    State(state): State<AppState>,
    Query(params): Query<LocalSearchParams>,
) -> Result<Json<Value>, ApiError> {
    let found = state.local.find(params.base_directory, params.query).await?;
    Ok(Json(json!({ "results": display_paths(&found) })))
}

/// GET /sessions/:id
pub async fn session(State(state): State<AppState>, Path(session_id): Path<SessionId>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.coordinator.session(session_id).await?;
    Ok(Json(json!(snapshot)))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sources": state.coordinator.source_types(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{page_from_results, AdapterRegistry, PageStream, SourceAdapter};
    use crate::config::AppConfig;
    use crate::coordinator::{CoordinatorOptions, SearchCoordinator};
    use crate::cursor::{PageEnd, PaginationCursor};
    use crate::errors::AdapterFailure;
    use crate::model::SearchResult;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Token paginated video source with two pages.
    struct TokenAdapter;

    #[async_trait]
    impl SourceAdapter for TokenAdapter {
        fn name(&self) -> &str {
            "token"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Video
        }

        fn first_position(&self) -> CursorPosition {
            CursorPosition::first_token()
        }

        async fn search(
            &self,
            _query: &SearchQuery,
            cursor: Option<&PaginationCursor>,
        ) -> Result<PageStream, AdapterFailure> {
            match crate::adapters::page_token(cursor).as_deref() {
                None => Ok(page_from_results(
                    vec![SearchResult::new("https://v/1", "one", SourceType::Video).with_tag("cats")],
                    PageEnd::Next {
                        token: Some("p2".to_string()),
                    },
                )),
                Some("p2") => Ok(page_from_results(
                    vec![SearchResult::new("https://v/2", "two", SourceType::Video)],
                    PageEnd::Exhausted,
                )),
                Some(other) => Err(AdapterFailure::malformed(format!("bad token {}", other))),
            }
        }
    }

    fn state() -> AppState {
        let registry = AdapterRegistry::new().with(Arc::new(TokenAdapter));
        AppState::new(
            SearchCoordinator::new(registry, CoordinatorOptions::default()),
            AppConfig::default(),
        )
    }

    fn local_state(root: &std::path::Path) -> AppState {
        let config = AppConfig {
            local_search_root: root.to_path_buf(),
            ..AppConfig::default()
        };
        AppState::new(
            SearchCoordinator::new(AdapterRegistry::new().with(Arc::new(TokenAdapter)), CoordinatorOptions::default()),
            config,
        )
    }

    fn params(query: &str, token: Option<&str>) -> SearchVideosParams {
        SearchVideosParams {
            query: Some(query.to_string()),
            page_token: token.map(str::to_string),
            ..SearchVideosParams::default()
        }
    }

    #[tokio::test]
    async fn search_videos_pages_by_token() {
        let state = state();
        let Json(first) = search_videos(State(state.clone()), Query(params("cats", None)))
            .await
            .unwrap();
        assert_eq!(first["count"], 1);
        assert_eq!(first["nextPageToken"], "p2");

        let Json(second) = search_videos(State(state.clone()), Query(params("cats", Some("p2"))))
            .await
            .unwrap();
        assert_eq!(second["results"][0]["url"], "https://v/2");
        assert_eq!(second["nextPageToken"], Value::Null);

        let Json(tags) = recommend_tags(
            State(state),
            Query(RecommendParams {
                query: "cat".to_string(),
            }),
        )
        .await;
        assert_eq!(tags["tags"], json!(["cats"]));
    }

    #[tokio::test]
    async fn missing_query_is_bad_request() {
        let err = search_videos(State(state()), Query(params("  ", None))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn adapter_failure_is_bad_gateway() {
        let err = search_videos(State(state()), Query(params("cats", Some("zzz"))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn page_and_limit_map_to_offsets() {
        let params = SearchVideosParams {
            page: Some(3),
            limit: Some(10),
            ..SearchVideosParams::default()
        };
        assert_eq!(
            params.position(25).unwrap(),
            Some(CursorPosition::Offset {
                offset: 20,
                page_size: 10
            })
        );
        assert_eq!(SearchVideosParams::default().position(25).unwrap(), None);
    }

    #[tokio::test]
    async fn overflowing_page_is_bad_request() {
        let params = SearchVideosParams {
            page: Some(usize::MAX),
            limit: Some(2),
            ..params("cats", None)
        };
        assert_eq!(params.position(25).unwrap_err().status, StatusCode::BAD_REQUEST);

        let err = search_videos(State(state()), Query(params)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn search_errors_map_to_statuses() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(ApiError::from(SearchError::session_not_found(id)).status, StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(SearchError::SessionBusy {
                source_type: SourceType::Video
            })
            .status,
            StatusCode::CONFLICT
        );
    }

    #[tokio::test]
    async fn local_routes_find_video_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("clips")).unwrap();
        for file in ["clips/cat.mp4", "clips/dog.mov", "clips/readme.md"] {
            std::fs::write(dir.path().join(file), b"x").unwrap();
        }
        let state = local_state(dir.path());

        let Json(all) = search_directories(
            State(state.clone()),
            Query(LocalSearchParams {
                base_directory: Some("clips".to_string()),
                query: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(all["results"].as_array().unwrap().len(), 2);

        let Json(cats) = advanced_search(
            State(state.clone()),
            Query(LocalSearchParams {
                base_directory: None,
                query: Some("Cat".to_string()),
            }),
        )
        .await
        .unwrap();
        let results = cats["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].as_str().unwrap().ends_with("cat.mp4"));

        let err = search_directories(
            State(state),
            Query(LocalSearchParams {
                base_directory: Some("../..".to_string()),
                query: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
