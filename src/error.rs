use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Error taxonomy surfaced to clients. The `kind` is what a client UI
/// keys a localized message off of; the message is diagnostic only and
/// never carries more detail than the kind already implies.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported codec")]
    UnsupportedCodec,

    #[error("request timed out")]
    Timeout,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("media worker died")]
    Fatal,
}

/// Wire-safe projection of an [`AppError`] — taxonomy name plus message,
/// nothing else.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorKind {
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn to_wire(&self) -> ErrorKind {
        let kind = match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::BadRequest(_) => "BadRequest",
            AppError::PermissionDenied(_) => "PermissionDenied",
            AppError::Conflict(_) => "Conflict",
            AppError::UnsupportedCodec => "UnsupportedCodec",
            AppError::Timeout => "Timeout",
            AppError::Internal(_) => "Internal",
            AppError::Fatal => "Fatal",
        };

        let message = match self {
            AppError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        ErrorKind { kind, message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnsupportedCodec => StatusCode::BAD_REQUEST,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Fatal => StatusCode::SERVICE_UNAVAILABLE,
        };

        let wire = self.to_wire();
        (status, Json(json!({ "error": wire }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Serializing an already-validated outgoing value should never fail;
/// treat it as an internal error rather than invent a new taxonomy kind.
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(anyhow::anyhow!("serialization error: {e}"))
    }
}
