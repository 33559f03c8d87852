//! Source adapters: the seam between the coordinator and the external
//! producers of results (scraped search pages, the YouTube Data API, or an
//! external scraper process).

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::info;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
use crate::errors::AdapterFailure;
use crate::model::{SearchQuery, SearchResult, SourceType};

pub mod bing;
pub mod http;
pub mod normalize;
pub mod process;
pub mod youtube;

pub use bing::{BingVideoAdapter, BingWebAdapter};
pub use http::HttpFetcher;
pub use process::ProcessAdapter;
pub use youtube::YouTubeApiAdapter;

/// One item of a page: a result, or the marker that ends the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    Result(SearchResult),
    End(PageEnd),
}

/// Lazily produced page. A stream that ends without `PageItem::End` is
/// treated as `Next` when it produced anything and `Exhausted` otherwise.
pub type PageStream = BoxStream<'static, Result<PageItem, AdapterFailure>>;

/// Trait for result producers
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn source_type(&self) -> SourceType;
    /// Position a fresh cursor starts from.
    fn first_position(&self) -> CursorPosition;
    /// Fetch the page at `cursor`, or the first page when `None`.
    async fn search(
        &self,
        query: &SearchQuery,
        cursor: Option<&PaginationCursor>,
    ) -> Result<PageStream, AdapterFailure>;
}

/// Wrap an already materialised page as a stream.
pub fn page_from_results(results: Vec<SearchResult>, end: PageEnd) -> PageStream {
    let items = results
        .into_iter()
        .map(|result| Ok(PageItem::Result(result)))
        .chain(std::iter::once(Ok(PageItem::End(end))));
    stream::iter(items).boxed()
}

/// Resolve the offset window a cursor points at, with `default_page_size`
/// for the first page.
pub fn offset_window(cursor: Option<&PaginationCursor>, default_page_size: usize) -> (usize, usize) {
    match cursor.map(|c| &c.position) {
        Some(CursorPosition::Offset { offset, page_size }) => (*offset, *page_size),
        _ => (0, default_page_size),
    }
}

pub fn page_token(cursor: Option<&PaginationCursor>) -> Option<String> {
    match cursor.map(|c| &c.position) {
        Some(CursorPosition::Token { token }) => token.clone(),
        _ => None,
    }
}

/// Adapters by the source type they serve. One adapter per source type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.adapters.insert(adapter.source_type(), adapter);
        self
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source_type).cloned()
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types: Vec<_> = self.adapters.keys().copied().collect();
        types.sort();
        types
    }

    /// Build the adapters the configuration asks for. An external scraper
    /// takes precedence for the source types it serves; otherwise video uses
    /// the YouTube API when a key is present and Bing scraping when not.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(10)
            .build()?;
        let fetcher = HttpFetcher::new(client, config);

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(BingWebAdapter::new(fetcher.clone(), config.page_size)));
        match &config.youtube_api_key {
            Some(key) if !key.trim().is_empty() => {
                registry.register(Arc::new(YouTubeApiAdapter::new(fetcher.clone(), key.clone(), config.page_size)));
            }
            _ => {
                registry.register(Arc::new(BingVideoAdapter::new(fetcher.clone(), config.page_size)));
            }
        }

        if let Some(command) = &config.scraper_command {
            for source_type in &config.scraper_sources {
                registry.register(Arc::new(ProcessAdapter::new(
                    command.clone(),
                    config.scraper_args.clone(),
                    *source_type,
                    config.page_size,
                )));
            }
        }

        for source_type in registry.source_types() {
            if let Some(adapter) = registry.get(source_type) {
                info!("Registered {} adapter for {} results", adapter.name(), source_type);
            }
        }
        Ok(registry)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}
