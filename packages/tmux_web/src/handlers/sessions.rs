use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::info;

use tmux_bridge::{DEFAULT_SESSION, Session};

use crate::AppState;
use crate::error::ApiError;

/// Bodies are parsed leniently: anything that is not the expected JSON
/// object is treated as `{}`.
fn lenient<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Empty strings count as missing.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Deserialize, Default)]
pub struct NameRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ExecRequest {
    #[serde(default)]
    cmd: Option<String>,
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.bridge.list().await)
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: NameRequest = lenient(&body);
    let name = non_empty(req.name)
        .unwrap_or_else(|| format!("session-{}", chrono::Utc::now().timestamp_millis()));

    if state
        .bridge
        .create(&name, state.config.session_cwd.as_deref())
        .await
    {
        state.metrics.session_created();
        info!("Session '{}' created over REST", name);
        Ok(Json(json!({ "success": true, "name": name })))
    } else {
        Err(ApiError::CreateFailed)
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if name == DEFAULT_SESSION {
        return Err(ApiError::DeleteDefault);
    }
    if state.bridge.kill(&name).await {
        state.metrics.session_killed();
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::SessionNotFound)
    }
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: NameRequest = lenient(&body);
    let Some(new_name) = non_empty(req.name) else {
        return Err(ApiError::MissingNewName);
    };
    if name == DEFAULT_SESSION {
        return Err(ApiError::RenameDefault);
    }
    if state.bridge.rename(&name, &new_name).await {
        state.metrics.session_renamed();
        Ok(Json(json!({ "success": true, "name": new_name })))
    } else {
        Err(ApiError::RenameFailed)
    }
}

/// Type a command into a session, followed by Enter.
pub async fn exec_command(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: ExecRequest = lenient(&body);
    let Some(cmd) = non_empty(req.cmd) else {
        return Err(ApiError::MissingCmd);
    };
    if state.bridge.send_keys(&session, &cmd).await {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::SessionNotFound)
    }
}
