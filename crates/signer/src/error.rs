//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
///
/// Messages name the failing check but never include secret material.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid keystore: {0}")]
    InvalidKeystore(String),

    #[error("keystore password is incorrect")]
    StorePasswordMismatch,

    #[error("key alias not found in keystore: {0}")]
    AliasNotFound(String),

    #[error("key password is incorrect for alias {0}")]
    KeyPasswordMismatch(String),

    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("cannot sign an empty APK")]
    EmptyApk,

    #[error("invalid signed APK: {0}")]
    InvalidSignedApk(String),

    #[error("verification failed")]
    VerificationFailed,
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
