//! Split pipeline error types.

use splitstore_catalog::CatalogError;
use splitstore_signer::SignerError;
use splitstore_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by split resolution.
///
/// Cloneable so one failed generation can be handed to every waiter.
#[derive(Clone, Debug, Error)]
pub enum SplitError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid split request: {0}")]
    Validation(String),

    #[error("split generation failed: {0}")]
    Generation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("archive error: {0}")]
    Archive(String),
}

impl From<CatalogError> for SplitError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(what) => Self::NotFound(what),
            CatalogError::Validation(msg) => Self::Validation(msg),
            CatalogError::Storage(e) => e.into(),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for SplitError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::InvalidKey(msg) => Self::Validation(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SignerError> for SplitError {
    fn from(err: SignerError) -> Self {
        Self::Signing(err.to_string())
    }
}

impl From<std::io::Error> for SplitError {
    fn from(err: std::io::Error) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type for split operations.
pub type SplitResult<T> = std::result::Result<T, SplitError>;
