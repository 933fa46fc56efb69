use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    Json(metrics::HealthStatus {
        status: "ok".to_string(),
        connections: state.connections.len().await as u64,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// UI settings the browser client reads on load
pub async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "theme": state.config.theme }))
}
