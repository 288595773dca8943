use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// The wire envelope for every error on both surfaces; the compatible
/// endpoints rely on this exact `{"error": {"type", "message"}}` shape.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("upload exceeds the configured maximum size")]
    PayloadTooLarge,

    #[error("job queue is full, retry later")]
    QueueFull,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing credentials")]
    Unauthorized,

    #[error("invalid credentials")]
    Forbidden,

    #[error("duplicate job id: {0}")]
    DuplicateId(String),

    #[error("model is busy")]
    ModelBusy,

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("request timed out waiting for the job")]
    Timeout,

    /// A classified per-stage failure surfaced synchronously, keeping the
    /// job row's error type on the wire.
    #[error("{message}")]
    Pipeline { kind: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, String) {
        let (status, kind) = match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Self::QueueFull => (StatusCode::TOO_MANY_REQUESTS, "queue_full"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Self::DuplicateId(_) => (StatusCode::CONFLICT, "duplicate_id"),
            Self::ModelBusy => (StatusCode::CONFLICT, "busy"),
            Self::ModelUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "model_unavailable")
            }
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Self::Pipeline { kind, .. } => {
                return (StatusCode::INTERNAL_SERVER_ERROR, kind.clone());
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        (status, kind.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();

        let message = match &self {
            // never leak internals to clients
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "internal_error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetails { kind, message },
        });

        (status, body).into_response()
    }
}

impl From<moji_store::Error> for ApiError {
    fn from(e: moji_store::Error) -> Self {
        match e {
            moji_store::Error::NotFound(id) => Self::NotFound(id),
            moji_store::Error::DuplicateId(id) => Self::DuplicateId(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<moji_media::Error> for ApiError {
    fn from(e: moji_media::Error) -> Self {
        match e {
            moji_media::Error::TooLarge { .. } => Self::PayloadTooLarge,
            other => Self::Internal(other.to_string()),
        }
    }
}
