use async_trait::async_trait;
use log::debug;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use super::normalize::decorate;
use super::{offset_window, page_from_results, HttpFetcher, PageStream, SourceAdapter};
use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
use crate::errors::AdapterFailure;
use crate::model::{SearchQuery, SearchResult, SourceType};

const BING_ORIGIN: &str = "https://www.bing.com";

fn selector(css: &str) -> Result<Selector, AdapterFailure> {
    Selector::parse(css).map_err(|e| AdapterFailure::malformed(format!("bad selector {}: {:?}", css, e)))
}

fn clean_text(text: impl Iterator<Item = impl AsRef<str>>) -> String {
    let joined: String = text.map(|t| t.as_ref().to_string()).collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn absolute(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else if href.starts_with('/') {
        Some(format!("{}{}", BING_ORIGIN, href))
    } else {
        None
    }
}

fn first_text(element: &ElementRef, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .map(|e| clean_text(e.text()))
        .filter(|t| !t.is_empty())
}

fn page_end(produced: usize) -> PageEnd {
    if produced == 0 {
        PageEnd::Exhausted
    } else {
        PageEnd::Next { token: None }
    }
}

/// Parse a Bing video results page.
pub fn parse_video_page(html: &str) -> Result<Vec<SearchResult>, AdapterFailure> {
    let document = Html::parse_document(html);
    let containers = [selector("div.dg_u")?, selector("div.mc_vtvc")?];
    let link_sel = selector("a[href]")?;
    let title_sel = selector(".mc_vtvc_title")?;
    let img_sel = selector("img")?;
    let duration_sel = selector(".mc_vtvc_len, .mc_vtvc_duration, .mc_bc_rc")?;
    let meta_sel = selector(".mc_vtvc_meta_row span")?;

    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for container in &containers {
        for element in document.select(container) {
            let Some(url) = element
                .select(&link_sel)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(absolute)
            else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }

            let title = element
                .select(&title_sel)
                .next()
                .and_then(|t| t.value().attr("title").map(str::to_string).or_else(|| Some(clean_text(t.text()))))
                .filter(|t| !t.is_empty());
            let Some(title) = title else {
                debug!("Skipping Bing video without title: {}", url);
                continue;
            };

            let mut result = SearchResult::new(url, title.clone(), SourceType::Video)
                .with_description(title)
                .with_metadata("source", "Bing");
            if let Some(thumbnail) = element
                .select(&img_sel)
                .next()
                .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
                .filter(|src| src.starts_with("http"))
            {
                result = result.with_thumbnail(thumbnail);
            }
            if let Some(duration) = first_text(&element, &duration_sel) {
                result = result.with_metadata("duration", duration);
            }
            if let Some(views) = element
                .select(&meta_sel)
                .map(|span| clean_text(span.text()))
                .find(|text| text.to_lowercase().contains("view"))
            {
                result = result.with_metadata("views", views);
            }
            results.push(decorate(result));
        }
        if !results.is_empty() {
            break; // Found results with this layout
        }
    }

    Ok(results)
}

/// Parse a Bing web results page.
pub fn parse_web_page(html: &str) -> Result<Vec<SearchResult>, AdapterFailure> {
    let document = Html::parse_document(html);
    let item_sel = selector("li.b_algo")?;
    let link_sel = selector("h2 a[href]")?;
    let snippet_sel = selector(".b_caption p, p")?;
    let favicon_sel = selector(".b_attribution img, img.rms_img")?;

    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for item in document.select(&item_sel) {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").filter(|h| h.starts_with("http")) else {
            continue;
        };
        if !seen.insert(url.to_string()) {
            continue;
        }

        let mut result = SearchResult::new(url, clean_text(link.text()), SourceType::Website)
            .with_metadata("source", "Bing");
        if let Some(snippet) = first_text(&item, &snippet_sel) {
            result = result.with_description(snippet);
        }
        if let Some(favicon) = item
            .select(&favicon_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .filter(|src| src.starts_with("http"))
        {
            result = result.with_metadata("favicon", favicon);
        }
        if result.title.is_empty() {
            result.title = result.url.clone();
        }
        results.push(decorate(result));
    }

    Ok(results)
}

/// Bing video search scraping, offset paginated through `first=`.
pub struct BingVideoAdapter {
    fetcher: HttpFetcher,
    page_size: usize,
}

impl BingVideoAdapter {
    pub fn new(fetcher: HttpFetcher, page_size: usize) -> Self {
        Self { fetcher, page_size }
    }
}

#[async_trait]
impl SourceAdapter for BingVideoAdapter {
    fn name(&self) -> &str {
        "bing-videos"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Video
    }

    fn first_position(&self) -> CursorPosition {
        CursorPosition::first_offset(self.page_size)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        cursor: Option<&PaginationCursor>,
    ) -> Result<PageStream, AdapterFailure> {
        let (offset, page_size) = offset_window(cursor, self.page_size);
        let url = format!(
            "{}/videos/search?q={}&first={}&count={}",
            BING_ORIGIN,
            urlencoding::encode(&query.search_terms()),
            offset,
            page_size
        );
        let html = self.fetcher.fetch_text(&url).await?;
        let mut results = parse_video_page(&html)?;
        let end = page_end(results.len());
        results.truncate(page_size);
        debug!("Bing videos offset {} yielded {} results", offset, results.len());
        Ok(page_from_results(results, end))
    }
}

/// Bing web search scraping, offset paginated through `first=` (1-based).
pub struct BingWebAdapter {
    fetcher: HttpFetcher,
    page_size: usize,
}

impl BingWebAdapter {
    pub fn new(fetcher: HttpFetcher, page_size: usize) -> Self {
        Self { fetcher, page_size }
    }
}

#[async_trait]
impl SourceAdapter for BingWebAdapter {
    fn name(&self) -> &str {
        "bing-web"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Website
    }

    fn first_position(&self) -> CursorPosition {
        CursorPosition::first_offset(self.page_size)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        cursor: Option<&PaginationCursor>,
    ) -> Result<PageStream, AdapterFailure> {
        let (offset, page_size) = offset_window(cursor, self.page_size);
        let url = format!(
            "{}/search?q={}&first={}&count={}",
            BING_ORIGIN,
            urlencoding::encode(&query.search_terms()),
            offset + 1,
            page_size
        );
        let html = self.fetcher.fetch_text(&url).await?;
        let mut results = parse_web_page(&html)?;
        let end = page_end(results.len());
        results.truncate(page_size);
        debug!("Bing web offset {} yielded {} results", offset, results.len());
        Ok(page_from_results(results, end))
    }
}
