//! HTTP and WebSocket surface.

pub mod download;
pub mod rest;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordinator::SearchCoordinator;
use crate::local::LocalSearch;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: SearchCoordinator,
    pub local: LocalSearch,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(coordinator: SearchCoordinator, config: AppConfig) -> Self {
        Self {
            coordinator,
            local: LocalSearch::new(config.local_search_root.clone()),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::websocket_handler))
        .route("/search_videos", get(rest::search_videos))
        .route("/tags/recommend", get(rest::recommend_tags))
        .route("/tags/top", get(rest::top_tags))
        .route("/search_history", get(rest::search_history))
        .route("/search_directories", get(rest::search_directories))
        .route("/advanced_search", get(rest::advanced_search))
        .route("/sessions/:id", get(rest::session))
        .route("/download_videos", post(download::download_videos))
        .route("/health", get(rest::health))
        .with_state(state)
}

/// Bind, serve until Ctrl-C, and prune finished sessions in the background.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let coordinator = SearchCoordinator::from_config(&config)?;
    let addr = config.bind_addr();
    let prune_every = config.session_retention().min(Duration::from_secs(60)).max(Duration::from_secs(1));

    let pruner = coordinator.clone();
    let prune_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        loop {
            interval.tick().await;
            pruner.prune_expired().await;
        }
    });

    let app = build_router(AppState::new(coordinator, config));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{} (WebSocket at /ws)", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    prune_task.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
