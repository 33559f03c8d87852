//! Realtime search over a WebSocket. Every frame is `{"event": .., "data": ..}`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::{JoinError, JoinSet};

use super::AppState;
use crate::channel::Subscription;
use crate::coordinator::SearchCoordinator;
use crate::model::{SearchEvent, SearchQuery, SessionId, SourceType};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    SearchQuery {
        query: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default, rename = "searchTypes")]
        search_types: Option<Vec<SourceType>>,
    },
    LoadMore {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "searchType")]
        search_type: SourceType,
    },
    StopSearch {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

pub fn frame(event: &str, data: Value) -> Value {
    json!({ "event": event, "data": data })
}

/// Wire frame for one session event.
pub fn event_frame(session_id: SessionId, event: &SearchEvent) -> Value {
    match event {
        SearchEvent::SessionStarted { query } => frame(
            "search_started",
            json!({
                "sessionId": session_id,
                "query": query.text,
                "message": format!("Starting search for: {}", query.text),
            }),
        ),
        SearchEvent::ResultProduced { result } => frame(
            "new_result",
            json!({ "sessionId": session_id, "result": result }),
        ),
        SearchEvent::PageDelivered {
            source_type,
            delivered,
            total,
            exhausted,
        } => frame(
            "page_completed",
            json!({
                "sessionId": session_id,
                "searchType": source_type,
                "delivered": delivered,
                "total": total,
                "exhausted": exhausted,
            }),
        ),
        SearchEvent::SessionCompleted { total } => frame(
            "search_completed",
            json!({ "sessionId": session_id, "total": total }),
        ),
        SearchEvent::SessionFailed { reason } => frame(
            "search_error",
            json!({ "sessionId": session_id, "error": reason }),
        ),
    }
}

pub fn error_frame(session_id: Option<SessionId>, error: impl std::fmt::Display) -> Value {
    match session_id {
        Some(session_id) => frame("search_error", json!({ "sessionId": session_id, "error": error.to_string() })),
        None => frame("search_error", json!({ "error": error.to_string() })),
    }
}

/// The connection's current search. It keeps its subscription after the
/// terminal event so later pages still reach the client.
struct ConnectionSearch {
    session_id: SessionId,
    query: String,
    events: Subscription,
    running: bool,
}

/// Something the connection has to react to besides a client frame.
enum Activity {
    Event(Option<SearchEvent>),
    PageDone(Result<Option<Value>, JoinError>),
}

/// Per-connection search state, independent of the socket. Client frames
/// and session activity go in; frames for the client come out.
struct Connection {
    coordinator: SearchCoordinator,
    current: Option<ConnectionSearch>,
    /// `load_more` requests in flight; each yields an error frame on failure.
    pages: JoinSet<Option<Value>>,
}

impl Connection {
    fn new(coordinator: SearchCoordinator) -> Self {
        Self {
            coordinator,
            current: None,
            pages: JoinSet::new(),
        }
    }

    /// Wait for the next session event or finished page request.
    async fn next_activity(&mut self) -> Activity {
        let Self { current, pages, .. } = self;
        tokio::select! {
            event = next_event(current) => Activity::Event(event),
            Some(done) = pages.join_next() => Activity::PageDone(done),
        }
    }

    async fn on_activity(&mut self, activity: Activity) -> Vec<Value> {
        match activity {
            Activity::Event(Some(event)) => self.forward(&event).await,
            Activity::Event(None) => {
                if let Some(search) = self.current.take() {
                    debug!("Result channel of session {} closed", search.session_id);
                }
                Vec::new()
            }
            Activity::PageDone(Ok(reply)) => reply.into_iter().collect(),
            Activity::PageDone(Err(e)) => {
                warn!("Page request task failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn forward(&mut self, event: &SearchEvent) -> Vec<Value> {
        let Some(search) = self.current.as_mut() else {
            return Vec::new();
        };
        let mut value = event_frame(search.session_id, event);
        if let SearchEvent::SessionCompleted { .. } = event {
            value["data"]["query"] = json!(search.query);
        }
        if event.is_terminal() {
            search.running = false;
        }

        let mut frames = vec![value];
        if let SearchEvent::SessionStarted { query } = event {
            let tags = self.coordinator.tags().recommend(&query.text).await;
            frames.push(frame("tag_recommendations", json!({ "tags": tags })));
        }
        frames
    }

    async fn handle_text(&mut self, text: &str) -> Vec<Value> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                debug!("Unparseable WebSocket frame: {}", e);
                vec![error_frame(None, format!("Malformed message: {}", e))]
            }
        }
    }

    async fn handle(&mut self, message: ClientMessage) -> Vec<Value> {
        match message {
            ClientMessage::SearchQuery {
                query,
                tags,
                search_types,
            } => {
                if self.current.as_ref().is_some_and(|search| search.running) {
                    return vec![error_frame(None, "A search is already in progress")];
                }
                let source_types = search_types.unwrap_or_else(|| vec![SourceType::Video]);
                let query = SearchQuery::new(query, source_types, tags);
                match self.coordinator.start_search(query).await {
                    Ok(started) => {
                        if let Some(previous) = self.current.take() {
                            let _ = self.coordinator.close_session(previous.session_id).await;
                        }
                        self.current = Some(ConnectionSearch {
                            session_id: started.session.id,
                            query: started.session.query.text.clone(),
                            events: started.events,
                            running: true,
                        });
                        Vec::new()
                    }
                    Err(e) => vec![error_frame(None, e)],
                }
            }
            ClientMessage::LoadMore {
                session_id,
                search_type,
            } => {
                if self.current.as_ref().map(|search| search.session_id) != Some(session_id) {
                    return vec![error_frame(Some(session_id), "Session not found")];
                }
                // runs beside the connection so stop_search and disconnects stay responsive;
                // delivered results reach the client through the subscription
                let coordinator = self.coordinator.clone();
                self.pages.spawn(async move {
                    match coordinator.request_more(session_id, search_type).await {
                        Ok(results) => {
                            debug!("Loaded {} more {} results for {}", results.len(), search_type, session_id);
                            None
                        }
                        Err(e) => Some(error_frame(Some(session_id), e)),
                    }
                });
                Vec::new()
            }
            ClientMessage::StopSearch { session_id } => match self.coordinator.cancel(session_id).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![error_frame(Some(session_id), e)],
            },
        }
    }

    /// The client is gone: stop its search and let page requests wind down.
    async fn disconnect(mut self) {
        if let Some(search) = &self.current {
            if search.running || !self.pages.is_empty() {
                let _ = self.coordinator.cancel(search.session_id).await;
            }
        }
        while self.pages.join_next().await.is_some() {}
    }
}

async fn next_event(current: &mut Option<ConnectionSearch>) -> Option<SearchEvent> {
    match current {
        Some(search) => search.events.recv().await,
        None => std::future::pending().await,
    }
}

type Sender = SplitSink<WebSocket, Message>;

async fn send_all(sender: &mut Sender, frames: Vec<Value>) -> bool {
    for value in frames {
        if let Err(e) = sender.send(Message::Text(value.to_string())).await {
            debug!("Failed to send frame to WebSocket client: {}", e);
            return false;
        }
    }
    true
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| connection(socket, state))
}

async fn connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::new(state.coordinator.clone());
    info!("WebSocket client connected");

    if !send_all(&mut sender, vec![frame("connected", json!({ "status": "Connected to server" }))]).await {
        return;
    }

    loop {
        let replies = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => conn.handle_text(&text).await,
                Some(Ok(Message::Close(_))) => {
                    debug!("WebSocket client disconnected (close frame)");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    debug!("WebSocket stream ended");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            activity = conn.next_activity() => conn.on_activity(activity).await,
        };
        if !send_all(&mut sender, replies).await {
            break;
        }
    }

    conn.disconnect().await;
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{offset_window, page_from_results, AdapterRegistry, PageStream, SourceAdapter};
    use crate::coordinator::CoordinatorOptions;
    use crate::cursor::{CursorPosition, PageEnd, PaginationCursor};
    use crate::errors::AdapterFailure;
    use crate::model::{SearchResult, SessionState};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    /// Two video pages; each waits its stall before answering.
    struct SlowAdapter {
        first_stall: Duration,
        more_stall: Duration,
    }

    #[async_trait]
    impl SourceAdapter for SlowAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Video
        }

        fn first_position(&self) -> CursorPosition {
            CursorPosition::first_offset(1)
        }

        async fn search(
            &self,
            _query: &SearchQuery,
            cursor: Option<&PaginationCursor>,
        ) -> Result<PageStream, AdapterFailure> {
            let (offset, _) = offset_window(cursor, 1);
            if offset == 0 {
                tokio::time::sleep(self.first_stall).await;
                let result = SearchResult::new("https://v/1", "one", SourceType::Video);
                Ok(page_from_results(vec![result], PageEnd::Next { token: None }))
            } else {
                tokio::time::sleep(self.more_stall).await;
                let result = SearchResult::new("https://v/2", "two", SourceType::Video);
                Ok(page_from_results(vec![result], PageEnd::Exhausted))
            }
        }
    }

    fn connection(first_stall: Duration, more_stall: Duration) -> (Connection, SearchCoordinator) {
        let registry = AdapterRegistry::new().with(Arc::new(SlowAdapter { first_stall, more_stall }));
        let coordinator = SearchCoordinator::new(
            registry,
            CoordinatorOptions {
                adapter_timeout: Duration::from_secs(30),
                ..CoordinatorOptions::default()
            },
        );
        (Connection::new(coordinator.clone()), coordinator)
    }

    fn search_frame(query: &str) -> String {
        json!({ "event": "search_query", "data": { "query": query } }).to_string()
    }

    /// Drive the connection until a frame with `event` comes out.
    async fn frames_until(conn: &mut Connection, event: &str) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let activity = tokio::time::timeout(Duration::from_secs(5), conn.next_activity())
                .await
                .expect("connection activity within 5s");
            let frames = conn.on_activity(activity).await;
            let done = frames.iter().any(|f| f["event"] == event);
            seen.extend(frames);
            if done {
                return seen;
            }
        }
    }

    async fn wait_for_state(coordinator: &SearchCoordinator, id: SessionId, state: SessionState) {
        for _ in 0..100 {
            if coordinator.session(id).await.map(|s| s.state) == Ok(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} never reached {:?}", id, state);
    }

    #[tokio::test]
    async fn second_search_while_running_is_refused() {
        let (mut conn, coordinator) = connection(Duration::from_secs(10), Duration::ZERO);
        assert!(conn.handle_text(&search_frame("cats")).await.is_empty());
        let first = conn.current.as_ref().unwrap().session_id;

        let replies = conn.handle_text(&search_frame("dogs")).await;
        assert_eq!(replies, vec![error_frame(None, "A search is already in progress")]);
        assert_eq!(conn.current.as_ref().unwrap().session_id, first);
        assert_eq!(coordinator.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_the_running_search() {
        let (mut conn, coordinator) = connection(Duration::from_secs(10), Duration::ZERO);
        conn.handle_text(&search_frame("cats")).await;
        let id = conn.current.as_ref().unwrap().session_id;

        conn.disconnect().await;
        wait_for_state(&coordinator, id, SessionState::Failed).await;
        let snapshot = coordinator.session(id).await.unwrap();
        assert_eq!(
            snapshot.adapter_states[&SourceType::Video],
            crate::model::AdapterState::Failed("Cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn new_search_closes_the_finished_one() {
        let (mut conn, coordinator) = connection(Duration::ZERO, Duration::ZERO);
        conn.handle_text(&search_frame("cats")).await;
        let first = conn.current.as_ref().unwrap().session_id;

        let frames = frames_until(&mut conn, "search_completed").await;
        let events: Vec<_> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(
            events,
            vec!["search_started", "tag_recommendations", "new_result", "search_completed"]
        );
        assert_eq!(frames[3]["data"]["query"], "cats");

        assert!(conn.handle_text(&search_frame("dogs")).await.is_empty());
        let second = conn.current.as_ref().unwrap().session_id;
        assert_ne!(first, second);
        assert_eq!(
            coordinator.session(first).await.err(),
            Some(crate::errors::SearchError::session_not_found(first))
        );
        assert!(coordinator.session(second).await.is_ok());
    }

    #[tokio::test]
    async fn stop_search_is_handled_while_a_page_is_loading() {
        let (mut conn, coordinator) = connection(Duration::ZERO, Duration::from_secs(10));
        conn.handle_text(&search_frame("cats")).await;
        let id = conn.current.as_ref().unwrap().session_id;
        frames_until(&mut conn, "search_completed").await;

        let load_more = json!({ "event": "load_more", "data": { "sessionId": id, "searchType": "video" } });
        let replies = tokio::time::timeout(Duration::from_secs(1), conn.handle_text(&load_more.to_string()))
            .await
            .expect("load_more returns without waiting for the page");
        assert!(replies.is_empty());

        let stop = json!({ "event": "stop_search", "data": { "sessionId": id } });
        let replies = tokio::time::timeout(Duration::from_secs(1), conn.handle_text(&stop.to_string()))
            .await
            .expect("stop_search is not queued behind the page");
        assert!(replies.is_empty());

        // the cancelled page reports back on the connection
        let frames = frames_until(&mut conn, "search_error").await;
        let error = frames.iter().find(|f| f["event"] == "search_error").unwrap();
        assert_eq!(error["data"]["sessionId"], id.to_string());
        assert!(error["data"]["error"].as_str().unwrap().contains("closed"));
        assert_eq!(
            coordinator.session(id).await.unwrap().adapter_states[&SourceType::Video],
            crate::model::AdapterState::Failed("Cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn load_more_for_another_session_is_refused() {
        let (mut conn, _coordinator) = connection(Duration::ZERO, Duration::ZERO);
        let other = Uuid::new_v4();
        let load_more = json!({ "event": "load_more", "data": { "sessionId": other, "searchType": "video" } });
        assert_eq!(
            conn.handle_text(&load_more.to_string()).await,
            vec![error_frame(Some(other), "Session not found")]
        );
        assert!(conn.handle_text("not json").await[0]["data"]["error"]
            .as_str()
            .unwrap()
            .starts_with("Malformed message"));
    }

    #[test]
    fn parses_client_frames() {
        let search: ClientMessage = serde_json::from_str(
            r#"{"event": "search_query", "data": {"query": "cats", "tags": ["funny"], "searchTypes": ["videos", "website"]}}"#,
        )
        .unwrap();
        assert_eq!(
            search,
            ClientMessage::SearchQuery {
                query: "cats".to_string(),
                tags: vec!["funny".to_string()],
                search_types: Some(vec![SourceType::Video, SourceType::Website]),
            }
        );

        let id = Uuid::new_v4();
        let more: ClientMessage = serde_json::from_value(json!({
            "event": "load_more",
            "data": {"sessionId": id, "searchType": "video"}
        }))
        .unwrap();
        assert_eq!(
            more,
            ClientMessage::LoadMore {
                session_id: id,
                search_type: SourceType::Video
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event": "reboot", "data": {}}"#).is_err());
    }

    #[test]
    fn search_query_defaults() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"event": "search_query", "data": {"query": "cats"}}"#).unwrap();
        assert!(matches!(
            message,
            ClientMessage::SearchQuery { tags, search_types: None, .. } if tags.is_empty()
        ));
    }

    #[test]
    fn encodes_session_events() {
        let id = Uuid::new_v4();
        let query = SearchQuery::new("cats", [SourceType::Video], Vec::<String>::new());

        let started = event_frame(id, &SearchEvent::SessionStarted { query });
        assert_eq!(started["event"], "search_started");
        assert_eq!(started["data"]["message"], "Starting search for: cats");

        let result = SearchResult::new("https://a", "A", SourceType::Video);
        let produced = event_frame(id, &SearchEvent::ResultProduced { result });
        assert_eq!(produced["event"], "new_result");
        assert_eq!(produced["data"]["result"]["url"], "https://a");
        assert_eq!(produced["data"]["sessionId"], id.to_string());

        let page = event_frame(
            id,
            &SearchEvent::PageDelivered {
                source_type: SourceType::Website,
                delivered: 3,
                total: 10,
                exhausted: false,
            },
        );
        assert_eq!(page["event"], "page_completed");
        assert_eq!(page["data"]["searchType"], "website");

        let completed = event_frame(id, &SearchEvent::SessionCompleted { total: 2 });
        assert_eq!(completed, frame("search_completed", json!({"sessionId": id, "total": 2})));

        let failed = event_frame(
            id,
            &SearchEvent::SessionFailed {
                reason: "video: Timeout".to_string(),
            },
        );
        assert_eq!(failed["event"], "search_error");
        assert_eq!(failed["data"]["error"], "video: Timeout");
    }

    #[test]
    fn error_frame_without_session() {
        assert_eq!(
            error_frame(None, "Please enter a search query"),
            json!({"event": "search_error", "data": {"error": "Please enter a search query"}})
        );
    }
}
