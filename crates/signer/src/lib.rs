//! Keystore handling and APK signing.
//!
//! Split APKs are signed with the Ed25519 key stored under an alias in the
//! bundle's keystore. Devices are matched against the certificate
//! fingerprint, the hex SHA-256 of the public key.

pub mod error;
pub mod key;
pub mod keystore;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey, fingerprints_match, normalize_fingerprint};
pub use keystore::Keystore;
pub use signer::{ApkSigner, KeystoreSigner, VerifiedApk, sign, sign_apk, verify_signed_apk};
