//! tmux-web: named tmux sessions in the browser.
//!
//! A REST surface manages sessions and `/ws/{session}` streams one attached
//! PTY per WebSocket. Everything that touches tmux lives in `tmux_bridge`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
#[cfg(test)]
mod test_helpers;
pub mod transport;

use axum::{
    Router,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tower_http::services::ServeDir;

use tmux_bridge::SessionBridge;

use crate::config::AppConfig;
use crate::metrics::ServerMetrics;
use crate::transport::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub bridge: SessionBridge,
    /// Live WebSocket → PTY bindings
    pub connections: Arc<ConnectionRegistry>,
    pub config: Arc<AppConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(bridge: SessionBridge, config: AppConfig) -> Self {
        Self {
            bridge,
            connections: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }
}

/// All routes. Paths that match none are served from the static directory.
pub fn app_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);
    Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{name}",
            patch(handlers::rename_session).delete(handlers::delete_session),
        )
        .route("/exec/{session}", post(handlers::exec_command))
        .route("/config", get(handlers::config_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/ws/{session}", get(transport::websocket_handler))
        .fallback_service(static_files)
        .with_state(state)
}
