use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// ErrorBody は構造化エラーのペイロード。code は `SYS_LOGGING_{ERROR}` 形式。
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

/// ErrorResponse は `{ "error": ... }` エンベロープ。
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                request_id: uuid::Uuid::new_v4().to_string(),
            },
        }
    }
}

/// LoggingError はクエリ API のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("log entry not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for LoggingError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{e:#}"))
    }
}

impl IntoResponse for LoggingError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            LoggingError::NotFound(_) => (StatusCode::NOT_FOUND, "SYS_LOGGING_NOT_FOUND"),
            LoggingError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "SYS_LOGGING_VALIDATION_ERROR")
            }
            LoggingError::Internal(msg) => {
                tracing::error!(error = %msg, "logging query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "SYS_LOGGING_INTERNAL_ERROR")
            }
        };

        let body = ErrorResponse::new(code, self.to_string());
        (status, Json(body)).into_response()
    }
}
