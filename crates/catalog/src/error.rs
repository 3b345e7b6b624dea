//! Catalog error types.

use splitstore_storage::StorageError;
use thiserror::Error;

/// Bundle store and device registry errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("bundle already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("corrupt record at {key}: {message}")]
    CorruptRecord { key: String, message: String },
}

impl From<splitstore_core::Error> for CatalogError {
    fn from(err: splitstore_core::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
