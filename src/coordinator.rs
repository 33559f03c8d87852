//! Search sessions: fan-out to the selected adapters, deduplication,
//! incremental delivery through the result channel, pagination and the
//! terminal completed/failed decision.

use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, PageItem, SourceAdapter};
use crate::channel::{ResultChannel, Subscription};
use crate::config::AppConfig;
use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
use crate::errors::{AdapterFailure, SearchError};
use crate::history::SearchHistory;
use crate::model::{
    AdapterState, SearchEvent, SearchQuery, SearchResult, SearchSession, SessionId, SessionState, SourceType,
};
use crate::tags::TagIndex;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub adapter_timeout: Duration,
    pub session_retention: Duration,
    pub channel_buffer: usize,
    pub history_size: usize,
    /// Persist search history here; `None` keeps it in memory.
    pub history_file: Option<PathBuf>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(30),
            session_retention: Duration::from_secs(600),
            channel_buffer: 1024,
            history_size: 100,
            history_file: None,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            adapter_timeout: config.adapter_timeout(),
            session_retention: config.session_retention(),
            channel_buffer: config.channel_buffer,
            history_size: config.history_size,
            history_file: config.history_path(),
        }
    }
}

/// What `start_search` hands back: the session as created and a
/// subscription opened before `SessionStarted` was published.
pub struct StartedSearch {
    pub session: SearchSession,
    pub events: Subscription,
}

/// One stateless page fetched outside any session.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub results: Vec<SearchResult>,
    pub next: PaginationCursor,
}

struct SourceProgress {
    state: AdapterState,
    cursor: PaginationCursor,
    in_flight: bool,
}

struct SessionInner {
    state: SessionState,
    seen: HashSet<String>,
    result_count: usize,
    sources: BTreeMap<SourceType, SourceProgress>,
    last_failure: Option<String>,
    fan_out_done: bool,
    finished_at: Option<Instant>,
}

struct Session {
    id: SessionId,
    query: SearchQuery,
    started_at: chrono::DateTime<Utc>,
    cancel: CancellationToken,
    inner: Mutex<SessionInner>,
}

impl Session {
    async fn snapshot(&self) -> SearchSession {
        let inner = self.inner.lock().await;
        SearchSession {
            id: self.id,
            query: self.query.clone(),
            state: inner.state,
            result_count: inner.result_count,
            started_at: self.started_at,
            adapter_states: inner
                .sources
                .iter()
                .map(|(source_type, progress)| (*source_type, progress.state.clone()))
                .collect(),
        }
    }
}

struct Inner {
    registry: AdapterRegistry,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    channel: ResultChannel,
    tags: TagIndex,
    history: SearchHistory,
    options: CoordinatorOptions,
}

/// Owns every live session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SearchCoordinator {
    inner: Arc<Inner>,
}

impl SearchCoordinator {
    pub fn new(registry: AdapterRegistry, options: CoordinatorOptions) -> Self {
        Self::with_tags(registry, options, TagIndex::new())
    }

    /// Share an existing tag table, e.g. between coordinators in tests.
    pub fn with_tags(registry: AdapterRegistry, options: CoordinatorOptions, tags: TagIndex) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sessions: RwLock::new(HashMap::new()),
                channel: ResultChannel::new(options.channel_buffer),
                tags,
                history: match &options.history_file {
                    Some(path) => SearchHistory::load(path.clone(), options.history_size),
                    None => SearchHistory::new(options.history_size),
                },
                options,
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let registry = AdapterRegistry::from_config(config)?;
        Ok(Self::new(registry, CoordinatorOptions::from_config(config)))
    }

    pub fn tags(&self) -> &TagIndex {
        &self.inner.tags
    }

    pub fn history(&self) -> &SearchHistory {
        &self.inner.history
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        self.inner.registry.source_types()
    }

    fn validate(&self, query: &SearchQuery) -> Result<(), SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::invalid_query("query text is empty"));
        }
        if query.source_types.is_empty() {
            return Err(SearchError::invalid_query("no source types selected"));
        }
        if let Some(missing) = query
            .source_types
            .iter()
            .find(|source_type| self.inner.registry.get(**source_type).is_none())
        {
            return Err(SearchError::invalid_query(format!("no adapter serves {} results", missing)));
        }
        Ok(())
    }

    /// Create a session and fan the query out to every selected source.
    pub async fn start_search(&self, query: SearchQuery) -> Result<StartedSearch, SearchError> {
        self.validate(&query)?;

        let id = Uuid::new_v4();
        let sources = query
            .source_types
            .iter()
            .filter_map(|source_type| {
                let adapter = self.inner.registry.get(*source_type)?;
                let cursor = PaginationCursor::new(id, *source_type, adapter.first_position());
                Some((
                    *source_type,
                    SourceProgress {
                        state: AdapterState::Pending,
                        cursor,
                        in_flight: false,
                    },
                ))
            })
            .collect();

        let session = Arc::new(Session {
            id,
            query: query.clone(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Started,
                seen: HashSet::new(),
                result_count: 0,
                sources,
                last_failure: None,
                fan_out_done: false,
                finished_at: None,
            }),
        });

        self.inner.sessions.write().await.insert(id, session.clone());
        let events = self.inner.channel.open(id).await;
        self.inner
            .channel
            .publish(id, SearchEvent::SessionStarted { query: query.clone() })
            .await;
        info!("Started search session {} for '{}'", id, query.text);

        self.inner.tags.record_tags(&query.tags).await;
        self.inner.history.record(&query).await;

        {
            let mut inner = session.inner.lock().await;
            inner.state = SessionState::Running;
            for progress in inner.sources.values_mut() {
                progress.state = AdapterState::Running;
                progress.in_flight = true;
            }
        }
        let snapshot = session.snapshot().await;

        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.fan_out(session).await });

        Ok(StartedSearch {
            session: snapshot,
            events,
        })
    }

    async fn fan_out(&self, session: Arc<Session>) {
        let runs = session
            .query
            .source_types
            .iter()
            .map(|source_type| self.run_initial_page(&session, *source_type));
        join_all(runs).await;

        // a page request may take the lock as soon as fan-out is marked done
        let mut inner = session.inner.lock().await;
        inner.fan_out_done = true;
        self.finish(session.id, &mut inner).await;
    }

    async fn run_initial_page(&self, session: &Session, source_type: SourceType) {
        let Some(adapter) = self.inner.registry.get(source_type) else {
            self.record_page(session, source_type, None, Err(AdapterFailure::Process("no adapter".to_string())))
                .await;
            return;
        };
        let cursor = {
            let inner = session.inner.lock().await;
            match inner.sources.get(&source_type) {
                Some(progress) => progress.cursor.clone(),
                None => return,
            }
        };
        debug!("Fetching first {} page with {}", source_type, adapter.name());
        let outcome = self.fetch_page(session, adapter.as_ref(), &cursor).await;
        self.record_page(session, source_type, Some(&cursor), outcome.map(|(end, _)| end))
            .await;
    }

    /// Book the outcome of one page on the source's progress. On success the
    /// cursor moves past the page; on failure it stays put.
    async fn record_page(
        &self,
        session: &Session,
        source_type: SourceType,
        cursor: Option<&PaginationCursor>,
        outcome: Result<PageEnd, AdapterFailure>,
    ) -> Option<PaginationCursor> {
        let mut inner = session.inner.lock().await;
        let failure_reason = match &outcome {
            Err(failure) => Some(format!("{}: {}", source_type, failure)),
            Ok(_) => None,
        };
        let progress = inner.sources.get_mut(&source_type)?;
        progress.in_flight = false;
        let advanced = match (outcome, cursor) {
            (Ok(end), Some(cursor)) => {
                let next = cursor.advance(&end);
                progress.cursor = next.clone();
                progress.state = AdapterState::Completed;
                Some(next)
            }
            (Ok(_), None) => {
                progress.state = AdapterState::Completed;
                None
            }
            (Err(failure), _) => {
                warn!("Session {} {} source failed: {}", session.id, source_type, failure);
                progress.state = AdapterState::Failed(failure.to_string());
                None
            }
        };
        if failure_reason.is_some() {
            inner.last_failure = failure_reason;
        }
        advanced
    }

    /// Pull one page from `adapter`, delivering each new result as it
    /// arrives. Bounded by the adapter deadline and the session's
    /// cancellation.
    async fn fetch_page(
        &self,
        session: &Session,
        adapter: &dyn SourceAdapter,
        cursor: &PaginationCursor,
    ) -> Result<(PageEnd, Vec<SearchResult>), AdapterFailure> {
        let deadline = self.inner.options.adapter_timeout;
        let work = async {
            let mut page = adapter.search(&session.query, Some(cursor)).await?;
            let mut produced = 0usize;
            let mut delivered = Vec::new();
            let mut end = None;
            while let Some(item) = page.next().await {
                match item? {
                    PageItem::Result(result) => {
                        produced += 1;
                        if let Some(result) = self.deliver(session, result).await {
                            delivered.push(result);
                        }
                    }
                    PageItem::End(page_end) => {
                        end = Some(page_end);
                        break;
                    }
                }
            }
            let end = end.unwrap_or(if produced > 0 {
                PageEnd::Next { token: None }
            } else {
                PageEnd::Exhausted
            });
            Ok::<_, AdapterFailure>((end, delivered))
        };

        tokio::select! {
            _ = session.cancel.cancelled() => Err(AdapterFailure::Cancelled),
            outcome = tokio::time::timeout(deadline, work) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "{} adapter for session {} exceeded {:?}",
                        adapter.name(),
                        session.id,
                        deadline
                    );
                    Err(AdapterFailure::Timeout)
                }
            },
        }
    }

    /// Deduplicate and publish one result. The count and the event move
    /// together under the session lock.
    async fn deliver(&self, session: &Session, result: SearchResult) -> Option<SearchResult> {
        {
            let mut inner = session.inner.lock().await;
            if !inner.seen.insert(result.url.clone()) {
                debug!("Session {} dropped duplicate {}", session.id, result.url);
                return None;
            }
            inner.result_count += 1;
            self.inner
                .channel
                .publish(
                    session.id,
                    SearchEvent::ResultProduced {
                        result: result.clone(),
                    },
                )
                .await;
        }
        self.inner.tags.record_tags(&result.tags).await;
        Some(result)
    }

    /// Publish the terminal event once fan-out is over and every source has
    /// settled. Runs under the caller's session guard.
    async fn finish(&self, session_id: SessionId, inner: &mut SessionInner) {
        if !inner.fan_out_done || inner.state.is_terminal() {
            return;
        }
        if !inner.sources.values().all(|progress| progress.state.is_settled()) {
            return;
        }

        let any_completed = inner
            .sources
            .values()
            .any(|progress| progress.state == AdapterState::Completed);
        let event = if any_completed {
            inner.state = SessionState::Completed;
            info!("Session {} completed with {} results", session_id, inner.result_count);
            SearchEvent::SessionCompleted {
                total: inner.result_count,
            }
        } else {
            inner.state = SessionState::Failed;
            let reason = inner
                .last_failure
                .clone()
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "all sources failed".to_string());
            warn!("Session {} failed: {}", session_id, reason);
            SearchEvent::SessionFailed { reason }
        };
        inner.finished_at = Some(Instant::now());
        self.inner.channel.publish(session_id, event).await;
    }

    async fn get(&self, session_id: SessionId) -> Result<Arc<Session>, SearchError> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SearchError::session_not_found(session_id))
    }

    /// Fetch the next page of one source and return the results it added.
    pub async fn request_more(
        &self,
        session_id: SessionId,
        source_type: SourceType,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let session = self.get(session_id).await?;
        let cursor = {
            let mut inner = session.inner.lock().await;
            if session.cancel.is_cancelled() || inner.state == SessionState::Failed {
                return Err(SearchError::SessionClosed { session_id });
            }
            let fan_out_done = inner.fan_out_done;
            let progress = inner
                .sources
                .get_mut(&source_type)
                .ok_or(SearchError::SourceNotSelected {
                    session_id,
                    source_type,
                })?;
            if !fan_out_done || progress.in_flight {
                return Err(SearchError::SessionBusy { source_type });
            }
            if progress.cursor.is_exhausted() {
                return Err(SearchError::SourceExhausted { source_type });
            }
            progress.in_flight = true;
            progress.state = AdapterState::Running;
            progress.cursor.clone()
        };

        let Some(adapter) = self.inner.registry.get(source_type) else {
            self.record_page(&session, source_type, None, Err(AdapterFailure::Process("no adapter".to_string())))
                .await;
            return Err(SearchError::SourceNotSelected {
                session_id,
                source_type,
            });
        };

        debug!(
            "Session {} requesting more {} results at {:?}",
            session_id, source_type, cursor.position
        );
        let outcome = self.fetch_page(&session, adapter.as_ref(), &cursor).await;
        match outcome {
            Ok((end, delivered)) => {
                let next = self
                    .record_page(&session, source_type, Some(&cursor), Ok(end))
                    .await;
                let exhausted = next.map(|c| c.is_exhausted()).unwrap_or(false);
                let total = session.inner.lock().await.result_count;
                self.inner
                    .channel
                    .publish(
                        session_id,
                        SearchEvent::PageDelivered {
                            source_type,
                            delivered: delivered.len(),
                            total,
                            exhausted,
                        },
                    )
                    .await;
                self.finish(session_id, &mut *session.inner.lock().await).await;
                Ok(delivered)
            }
            Err(failure) => {
                self.record_page(&session, source_type, Some(&cursor), Err(failure.clone()))
                    .await;
                self.finish(session_id, &mut *session.inner.lock().await).await;
                if failure == AdapterFailure::Cancelled {
                    return Err(SearchError::SessionClosed { session_id });
                }
                Err(SearchError::Adapter { source_type, failure })
            }
        }
    }

    /// Stop a session. In-flight sources end as `Failed(Cancelled)`;
    /// results already published stay.
    pub async fn cancel(&self, session_id: SessionId) -> Result<(), SearchError> {
        let session = self.get(session_id).await?;
        if !session.cancel.is_cancelled() {
            info!("Cancelling search session {}", session_id);
            session.cancel.cancel();
        }
        Ok(())
    }

    pub async fn session(&self, session_id: SessionId) -> Result<SearchSession, SearchError> {
        Ok(self.get(session_id).await?.snapshot().await)
    }

    pub async fn sessions(&self) -> Vec<SearchSession> {
        let sessions: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot().await);
        }
        snapshots.sort_by_key(|s| s.started_at);
        snapshots
    }

    /// Late subscription; only events published from now on are seen.
    pub async fn subscribe(&self, session_id: SessionId) -> Result<Subscription, SearchError> {
        self.inner
            .channel
            .subscribe(session_id)
            .await
            .ok_or_else(|| SearchError::session_not_found(session_id))
    }

    /// Forget a session, cancelling whatever it still runs.
    pub async fn close_session(&self, session_id: SessionId) -> Result<(), SearchError> {
        let session = self
            .inner
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or_else(|| SearchError::session_not_found(session_id))?;
        session.cancel.cancel();
        self.inner.channel.close(session_id).await;
        debug!("Closed search session {}", session_id);
        Ok(())
    }

    /// Drop terminal sessions older than the retention period.
    pub async fn prune_expired(&self) -> usize {
        let retention = self.inner.options.session_retention;
        let sessions: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for session in sessions {
            let inner = session.inner.lock().await;
            let idle = inner.sources.values().all(|progress| !progress.in_flight);
            if let Some(finished_at) = inner.finished_at {
                if idle && finished_at.elapsed() >= retention {
                    expired.push(session.id);
                }
            }
        }

        let mut pruned = 0;
        for session_id in expired {
            if self.close_session(session_id).await.is_ok() {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!("Pruned {} expired search sessions", pruned);
        }
        pruned
    }

    /// One page outside any session, for request/response clients. `None`
    /// fetches the adapter's first page.
    pub async fn fetch_stateless(
        &self,
        query: SearchQuery,
        source_type: SourceType,
        position: Option<CursorPosition>,
    ) -> Result<FetchedPage, SearchError> {
        let query = SearchQuery {
            source_types: [source_type].into_iter().collect(),
            ..query
        };
        self.validate(&query)?;
        let adapter = self
            .inner
            .registry
            .get(source_type)
            .ok_or_else(|| SearchError::invalid_query(format!("no adapter serves {} results", source_type)))?;
        let position = position.unwrap_or_else(|| adapter.first_position());
        let cursor = PaginationCursor::new(Uuid::new_v4(), source_type, position);

        let deadline = self.inner.options.adapter_timeout;
        let work = async {
            let mut page = adapter.search(&query, Some(&cursor)).await?;
            let mut seen = HashSet::new();
            let mut results = Vec::new();
            let mut end = None;
            while let Some(item) = page.next().await {
                match item? {
                    PageItem::Result(result) => {
                        if seen.insert(result.url.clone()) {
                            results.push(result);
                        }
                    }
                    PageItem::End(page_end) => {
                        end = Some(page_end);
                        break;
                    }
                }
            }
            Ok::<_, AdapterFailure>((results, end))
        };
        let (results, end) = tokio::time::timeout(deadline, work)
            .await
            .unwrap_or(Err(AdapterFailure::Timeout))
            .map_err(|failure| SearchError::Adapter { source_type, failure })?;

        let end = end.unwrap_or(if results.is_empty() {
            PageEnd::Exhausted
        } else {
            PageEnd::Next { token: None }
        });
        self.inner.tags.record_tags(&query.tags).await;
        for result in &results {
            self.inner.tags.record_tags(&result.tags).await;
        }
        Ok(FetchedPage {
            results,
            next: cursor.advance(&end),
        })
    }
}
