//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid bundle identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid device spec: {0}")]
    InvalidDeviceSpec(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid signing config: {0}")]
    InvalidSigningConfig(String),

    #[error("invalid split name: {0}")]
    InvalidSplitName(String),

    #[error("invalid language tag: {0}")]
    InvalidLanguage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
