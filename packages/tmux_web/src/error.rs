use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Control-surface failures, rendered as `{success: false, error}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Session already exists or creation failed")]
    CreateFailed,
    #[error("Cannot delete default session")]
    DeleteDefault,
    #[error("Cannot rename default session")]
    RenameDefault,
    #[error("Missing new name")]
    MissingNewName,
    #[error("Rename failed - session not found or name taken")]
    RenameFailed,
    #[error("Missing cmd")]
    MissingCmd,
    #[error("Session not found")]
    SessionNotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::CreateFailed
            | ApiError::DeleteDefault
            | ApiError::RenameDefault
            | ApiError::MissingNewName
            | ApiError::RenameFailed
            | ApiError::MissingCmd => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}
