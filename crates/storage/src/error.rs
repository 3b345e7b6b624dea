//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("GCS error: {0}")]
    Gcs(#[source] object_store::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl StorageError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Missing objects, create-only collisions, bad keys and bad configuration
    /// are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::NotFound(_)
            | StorageError::AlreadyExists(_)
            | StorageError::InvalidKey(_)
            | StorageError::Config(_) => false,
            StorageError::Gcs(err) => !matches!(
                err,
                object_store::Error::NotFound { .. }
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::Precondition { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
                    | object_store::Error::UnknownConfigurationKey { .. }
            ),
            StorageError::Io(_) | StorageError::S3(_) | StorageError::Timeout(_) => true,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
