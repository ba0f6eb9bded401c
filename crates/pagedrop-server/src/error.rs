//! HTTP error types for the Pagedrop server.
//!
//! Maps domain errors from `pagedrop-core` into HTTP responses. Every error
//! produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`. Internal failures are logged in full and
//! reported to the client without detail.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use pagedrop_core::error::{AuthError, KeyError, PageError};
use pagedrop_storage::StorageError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    BadRequest(String),
    /// Missing, unknown, revoked or expired access key.
    Unauthorized(String),
    /// The key lacks a permission, or its quota is used up.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// A conflict (e.g., admin key already initialized).
    Conflict(String),
    /// Request body or HTML content over the configured ceiling.
    PayloadTooLarge(String),
    /// Internal server error. The message is logged, never returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidKey | AuthError::Inactive | AuthError::Expired { .. } => {
                Self::Unauthorized(err.to_string())
            }
            AuthError::Corrupt(_) | AuthError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Validation { .. } => Self::BadRequest(err.to_string()),
            KeyError::NotFound { .. } => Self::NotFound(err.to_string()),
            KeyError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            KeyError::AlreadyInitialized | KeyError::NotInitialized => {
                Self::Conflict(err.to_string())
            }
            KeyError::IdExhausted { .. } | KeyError::Corrupt(_) | KeyError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Validation { .. } => Self::BadRequest(err.to_string()),
            PageError::PayloadTooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            PageError::QuotaExceeded { .. } | PageError::Forbidden { .. } => {
                Self::Forbidden(err.to_string())
            }
            PageError::NotFound { .. } => Self::NotFound(err.to_string()),
            PageError::IdExhausted { .. } | PageError::Corrupt(_) | PageError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge("request body exceeds the size limit".to_owned())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
