//! HTTP-facing error handling.
//!
//! Follows the same fail-secure posture the core crate documents: never
//! leak internal error detail across the HTTP boundary, map every
//! `platform_core::Error` onto a stable status code and machine-readable
//! code, and log the full error server-side before responding.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    InternalError,
    DatabaseError,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
}

impl ErrorResponse {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str(),
            error: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] platform_core::Error),

    #[error(transparent)]
    Runtime(#[from] platform_runtime::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,
}

/// Maps a core domain error onto the HTTP status/code pair a client
/// should see. Never forwards the error's `Display` text for variants
/// that might embed a raw libsql/IO message.
fn map_core_error(error: &platform_core::Error) -> (StatusCode, ErrorCode, String) {
    use platform_core::Error as E;
    match error {
        E::AuthRequired => (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, "authentication required".into()),
        E::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorCode::Forbidden, msg.clone()),
        _ if error.is_not_found() => (StatusCode::NOT_FOUND, ErrorCode::NotFound, error.to_string()),
        E::Invalid(msg) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError, msg.clone()),
        E::Validation(e) => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError, e.to_string()),
        E::Conflict(msg) => (StatusCode::CONFLICT, ErrorCode::Conflict, msg.clone()),
        E::AlreadyRunning(msg) => (StatusCode::CONFLICT, ErrorCode::Conflict, msg.clone()),
        E::Timeout(_) | E::LockTimeout { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::InternalError, "operation timed out, retry".into())
        }
        E::Libsql(e) => {
            let msg = e.to_string();
            if msg.to_lowercase().contains("unique constraint") {
                (StatusCode::CONFLICT, ErrorCode::Conflict, "a record with these values already exists".into())
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DatabaseError, "database operation failed".into())
            }
        }
        E::Upstream(_) | E::SerdeJson(_) | E::Io(_) | E::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, "an internal error occurred".into())
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "request error");

        let (status, response) = match &self {
            ServerError::Core(e) => {
                let (status, code, message) = map_core_error(e);
                (status, ErrorResponse::new(code, message))
            }
            ServerError::Runtime(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::InternalError, e.to_string()),
            ),
            ServerError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::InternalError, "file operation failed"),
            ),
            ServerError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(ErrorCode::BadRequest, msg.clone()))
            }
            ServerError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(ErrorCode::Unauthorized, "authentication required"),
            ),
            ServerError::Forbidden => {
                (StatusCode::FORBIDDEN, ErrorResponse::new(ErrorCode::Forbidden, "access denied"))
            }
        };

        (status, Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_core_errors_map_to_404() {
        let err = platform_core::Error::RepositoryNotFound("42".into());
        let (status, code, _) = map_core_error(&err);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code.as_str(), "NOT_FOUND");
    }

    #[test]
    fn auth_required_maps_to_401_not_500() {
        let err = platform_core::Error::AuthRequired;
        let (status, _, _) = map_core_error(&err);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
