use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::normalize::{normalize, RawResult};
use super::{offset_window, PageItem, PageStream, SourceAdapter};
use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
use crate::errors::AdapterFailure;
use crate::model::{SearchQuery, SourceType};

/// Incremental parser for scraper output. Accepts one JSON document
/// `{"results": [...], "nextPageToken": ..}` (single or multi-line), a bare
/// JSON array, or newline-delimited result objects optionally closed by a
/// `{"nextPageToken": ..}` / `{"done": true}` line.
#[derive(Debug)]
pub struct OutputParser {
    source_type: SourceType,
    page_size: usize,
    buffer: String,
    buffering: bool,
    ended: bool,
    produced: usize,
}

impl OutputParser {
    pub fn new(source_type: SourceType, page_size: usize) -> Self {
        Self {
            source_type,
            page_size,
            buffer: String::new(),
            buffering: false,
            ended: false,
            produced: 0,
        }
    }

    pub fn produced(&self) -> usize {
        self.produced
    }

    pub fn feed_line(&mut self, line: &str) -> Result<Vec<PageItem>, AdapterFailure> {
        if self.ended {
            return Ok(Vec::new());
        }
        if self.buffering {
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return Ok(Vec::new());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => self.handle_value(value),
            Err(_) => {
                // start of a pretty-printed document
                self.buffering = true;
                self.buffer.push_str(line);
                self.buffer.push('\n');
                Ok(Vec::new())
            }
        }
    }

    /// Flush buffered output and close the page if the producer did not.
    pub fn finish(&mut self) -> Result<Vec<PageItem>, AdapterFailure> {
        let mut items = Vec::new();
        if self.buffering && !self.ended {
            self.buffering = false;
            let value: Value = serde_json::from_str(&self.buffer).map_err(AdapterFailure::malformed)?;
            items = self.handle_value(value)?;
        }
        if !self.ended {
            self.ended = true;
            items.push(PageItem::End(self.implicit_end(self.produced)));
        }
        Ok(items)
    }

    fn implicit_end(&self, count: usize) -> PageEnd {
        if count >= self.page_size && count > 0 {
            PageEnd::Next { token: None }
        } else {
            PageEnd::Exhausted
        }
    }

    fn handle_value(&mut self, value: Value) -> Result<Vec<PageItem>, AdapterFailure> {
        match value {
            Value::Array(records) => {
                let mut items = self.results(records);
                let end = self.implicit_end(records_len(&items));
                self.ended = true;
                items.push(PageItem::End(end));
                Ok(items)
            }
            Value::Object(map) => self.handle_object(map),
            other => Err(AdapterFailure::malformed(format!("unexpected output: {}", other))),
        }
    }

    fn handle_object(&mut self, mut map: Map<String, Value>) -> Result<Vec<PageItem>, AdapterFailure> {
        if let Some(error) = map.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(AdapterFailure::Process(message));
        }

        let token = map
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if let Some(results) = map.remove("results") {
            let Value::Array(records) = results else {
                return Err(AdapterFailure::malformed("`results` is not an array"));
            };
            let mut items = self.results(records);
            let end = match token {
                Some(token) => PageEnd::Next { token: Some(token) },
                None => self.implicit_end(records_len(&items)),
            };
            self.ended = true;
            items.push(PageItem::End(end));
            return Ok(items);
        }

        if map.contains_key("url") {
            return Ok(self.results(vec![Value::Object(map)]));
        }

        if token.is_some() || map.contains_key("done") {
            self.ended = true;
            let end = match token {
                Some(token) => PageEnd::Next { token: Some(token) },
                None => PageEnd::Exhausted,
            };
            return Ok(vec![PageItem::End(end)]);
        }

        debug!("Ignoring unrecognised scraper record: {:?}", map.keys().collect::<Vec<_>>());
        Ok(Vec::new())
    }

    fn results(&mut self, records: Vec<Value>) -> Vec<PageItem> {
        let mut items = Vec::new();
        for record in records {
            match serde_json::from_value::<RawResult>(record) {
                Ok(raw) => {
                    if let Some(result) = normalize(raw, self.source_type) {
                        self.produced += 1;
                        items.push(PageItem::Result(result));
                    }
                }
                Err(e) => debug!("Skipping unparseable scraper record: {}", e),
            }
        }
        items
    }
}

fn records_len(items: &[PageItem]) -> usize {
    items.iter().filter(|item| matches!(item, PageItem::Result(_))).count()
}

/// Wraps the external scraping script. The request goes to the child's
/// stdin as one JSON line; results are read from stdout as they arrive.
pub struct ProcessAdapter {
    command: String,
    args: Vec<String>,
    source_type: SourceType,
    page_size: usize,
}

impl ProcessAdapter {
    pub fn new(command: String, args: Vec<String>, source_type: SourceType, page_size: usize) -> Self {
        Self {
            command,
            args,
            source_type,
            page_size,
        }
    }
}

#[async_trait]
impl SourceAdapter for ProcessAdapter {
    fn name(&self) -> &str {
        "scraper"
    }

    fn source_type(&self) -> SourceType {
        self.source_type
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
        let page = offset / page_size.max(1) + 1;
        let request = json!({
            "query": query.search_terms(),
            "text": query.text,
            "tags": query.tags,
            "sourceTypes": [self.source_type],
            "page": page,
            "limit": page_size,
        });

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterFailure::process(&self.command, e))?;
        debug!("Spawned scraper {} for page {}", self.command, page);

        if let Some(mut stdin) = child.stdin.take() {
            // a scraper that ignores stdin may already have closed it
            if let Err(e) = stdin.write_all(format!("{}\n", request).as_bytes()).await {
                debug!("Scraper {} did not accept the request on stdin: {}", self.command, e);
            }
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterFailure::process(&self.command, "stdout unavailable"))?;

        let (tx, rx) = mpsc::channel(64);
        let parser = OutputParser::new(self.source_type, page_size);
        tokio::spawn(pump(child, stdout, parser, tx, self.command.clone()));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

type ItemSender = mpsc::Sender<Result<PageItem, AdapterFailure>>;

async fn send_all(tx: &ItemSender, items: Vec<PageItem>) -> bool {
    for item in items {
        if tx.send(Ok(item)).await.is_err() {
            return false;
        }
    }
    true
}

async fn abandon(child: &mut Child, command: &str) {
    debug!("Killing scraper {}", command);
    if let Err(e) = child.kill().await {
        debug!("Scraper {} already gone: {}", command, e);
    }
}

async fn pump(mut child: Child, stdout: ChildStdout, mut parser: OutputParser, tx: ItemSender, command: String) {
    let stderr_tail = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("scraper stderr: {}", line);
                last = line;
            }
            last
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = tx.closed() => {
                // consumer timed out or was cancelled while the child was silent
                abandon(&mut child, &command).await;
                return;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match parser.feed_line(&line) {
                Ok(items) => {
                    if !send_all(&tx, items).await {
                        abandon(&mut child, &command).await;
                        return;
                    }
                }
                Err(failure) => {
                    let _ = tx.send(Err(failure)).await;
                    abandon(&mut child, &command).await;
                    return;
                }
            },
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(AdapterFailure::process(&command, e))).await;
                abandon(&mut child, &command).await;
                return;
            }
        }
    }

    let tail = parser.finish();
    let status = tokio::select! {
        _ = tx.closed() => {
            abandon(&mut child, &command).await;
            return;
        }
        status = child.wait() => status,
    };
    let stderr = match stderr_tail {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    match (tail, status) {
        (Err(failure), _) => {
            let _ = tx.send(Err(failure)).await;
        }
        (Ok(_), Ok(status)) if !status.success() && parser.produced() == 0 => {
            warn!("Scraper {} exited with {}", command, status);
            let _ = tx
                .send(Err(AdapterFailure::process(&command, format!("exited with {}: {}", status, stderr))))
                .await;
        }
        (Ok(_), Err(e)) if parser.produced() == 0 => {
            let _ = tx.send(Err(AdapterFailure::process(&command, e))).await;
        }
        (Ok(items), _) => {
            send_all(&tx, items).await;
        }
    }
}
