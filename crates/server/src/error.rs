//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use splitstore_catalog::CatalogError;
use splitstore_signer::SignerError;
use splitstore_splits::SplitError;
use splitstore_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("split generation failed: {0}")]
    Generation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Timeout(_) => "timeout",
            Self::Generation(_) => "generation_error",
            Self::Signing(_) => "signing_error",
            Self::Storage(_) => "storage_error",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<splitstore_core::Error> for ApiError {
    fn from(err: splitstore_core::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::InvalidKey(msg) => Self::BadRequest(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(msg) => Self::BadRequest(msg),
            CatalogError::Conflict(msg) => Self::Conflict(msg),
            CatalogError::NotFound(what) => Self::NotFound(what),
            CatalogError::Storage(e) => e.into(),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SplitError> for ApiError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::NotFound(what) => Self::NotFound(what),
            SplitError::Validation(msg) => Self::BadRequest(msg),
            SplitError::Generation(msg) => Self::Generation(msg),
            SplitError::Signing(msg) => Self::Signing(msg),
            SplitError::Storage(msg) => Self::Storage(msg),
            SplitError::Archive(msg) => Self::Internal(msg),
        }
    }
}

impl From<SignerError> for ApiError {
    fn from(err: SignerError) -> Self {
        Self::Signing(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
