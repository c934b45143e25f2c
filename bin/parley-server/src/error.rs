//! Unified server error type.
//!
//! Handlers return `Result<T, ServerError>`; [`IntoResponse`] turns it into a
//! `{"error": ...}` JSON body. Backend and internal failures are logged with
//! full detail while the client only sees a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::backend::BackendError;

/// Client-facing message for a turn that could not be started.
pub const CHAT_FAILED_MESSAGE: &str = "Failed to process chat request";

#[derive(Debug, Error)]
pub enum ServerError {
    /// The completion backend could not open a stream.
    #[error("completion backend error: {0}")]
    Backend(#[from] BackendError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Backend(e) => {
                error!(error = %e, "chat API error");
                (StatusCode::INTERNAL_SERVER_ERROR, CHAT_FAILED_MESSAGE.to_owned())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
