//! Error types for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::store::StoreError;

/// Errors a request handler can produce, each mapped to a status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The observation kind is not one of the accepted values.
    #[error("kind must be start|end|ping|ack")]
    InvalidKind,

    /// An admin input failed validation; the message is machine-readable.
    #[error("{0}")]
    Validation(String),

    /// Missing or wrong admin bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown expectation or trial.
    #[error("not found")]
    NotFound,

    /// The backing store failed; the caller should retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The handler exceeded its deadline.
    #[error("request timed out")]
    Timeout,
}

impl ApiError {
    /// HTTP status for this error.
    ///
    /// - Bad kind / validation: 400
    /// - Missing or wrong bearer token: 401
    /// - Unknown expectation or trial: 404
    /// - Oversized meta: 400 (a client defect, not a store fault)
    /// - Store failure: 500 so instrumented jobs retry
    /// - Deadline exceeded: 503
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidKind | Self::Validation(_) | Self::Store(StoreError::MetaTooLarge(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            // Machine-readable reasons for client defects; opaque text
            // otherwise so store internals stay out of responses.
            Self::InvalidKind | Self::Validation(_) | Self::Store(StoreError::MetaTooLarge(_)) => {
                (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
            }
            Self::Unauthorized => (status, "unauthorized\n").into_response(),
            Self::NotFound => (status, "not found\n").into_response(),
            Self::Store(_) => (status, "store unavailable, retry\n").into_response(),
            Self::Timeout => (status, "timed out\n").into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidKind.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Validation("need name".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Store(StoreError::MetaTooLarge(5000)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::LockPoisoned).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Timeout.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_errors_do_not_leak_details() {
        let response = ApiError::Store(StoreError::LockPoisoned).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
