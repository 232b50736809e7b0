use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing token")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AppError::NotFound(format!("environment {id}")),
            StoreError::TokenRejected(_) => AppError::Unauthorized,
            StoreError::TokenExists(id) => {
                AppError::Conflict(format!("token already issued for environment {id}"))
            }
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Storage and internal errors are logged
    /// here and replaced by a generic message.
    fn client_message(&self) -> String {
        match self {
            AppError::Unauthorized => "invalid token".to_string(),
            AppError::BadRequest(m) | AppError::NotFound(m) | AppError::Conflict(m) => m.clone(),
            AppError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
        }
    }

    /// Plain-text rendering for browser-facing endpoints (extension links).
    pub fn into_plain_response(self) -> Response {
        (self.status(), self.client_message()).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = self.client_message();

        let body = Json(json!({
            "success": false,
            "error": {
                "code": status.as_u16(),
                "message": msg,
            }
        }));

        (status, body).into_response()
    }
}
