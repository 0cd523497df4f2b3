//! API error types.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// JSON error envelope. Every failure response carries `success: false`,
/// a machine-readable error code, and a human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
    /// Chunk indices still outstanding; present only for `incomplete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<u32>>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("chunk of {got} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { got: u64, limit: u64 },

    #[error("upload incomplete: {} chunks missing", missing.len())]
    Incomplete { missing: Vec<u32> },

    #[error("assembled size {actual} does not match declared size {declared}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("requested range not satisfiable for a {len}-byte file")]
    RangeNotSatisfiable { len: u64 },

    #[error("too many live upload sessions")]
    ResourceExhausted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Incomplete { .. } => "incomplete",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::Storage(_) => "storage_error",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Incomplete { .. } => StatusCode::BAD_REQUEST,
            Self::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let missing = match &self {
            Self::Incomplete { missing } => Some(missing.clone()),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: self.code().to_string(),
            message: self.to_string(),
            missing,
        };
        // 416 reports the actual length so clients can restate their range.
        if let Self::RangeNotSatisfiable { len } = self {
            return (
                status,
                [(header::CONTENT_RANGE, format!("bytes */{len}"))],
                Json(body),
            )
                .into_response();
        }
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
