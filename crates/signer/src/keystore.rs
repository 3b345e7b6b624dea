//! Password-protected keystore files.
//!
//! A keystore is a JSON document holding one or more aliased Ed25519 seeds.
//! The store password and each key password are checked against SHA-256
//! digests before the matching entry is unlocked.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, SecretKey, constant_time_eq};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use splitstore_core::SigningConfig;

/// Format marker written into every keystore file.
pub const KEYSTORE_FORMAT: &str = "splitstore-keystore-v1";

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeystoreFile {
    format: String,
    store_password_sha256: String,
    entries: Vec<KeystoreEntry>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeystoreEntry {
    alias: String,
    key_password_sha256: String,
    secret_key: String,
}

/// A parsed, still locked keystore.
#[derive(Clone)]
pub struct Keystore {
    file: KeystoreFile,
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("aliases", &self.aliases().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn password_digest(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn password_matches(password: &str, digest: &str) -> bool {
    constant_time_eq(
        password_digest(password).as_bytes(),
        digest.to_ascii_lowercase().as_bytes(),
    )
}

impl Keystore {
    /// Create an empty keystore protected by `store_password`.
    pub fn new(store_password: &str) -> Self {
        Self {
            file: KeystoreFile {
                format: KEYSTORE_FORMAT.to_string(),
                store_password_sha256: password_digest(store_password),
                entries: Vec::new(),
            },
        }
    }

    /// Create a keystore holding a single freshly generated key.
    pub fn generate(alias: &str, store_password: &str, key_password: &str) -> Self {
        let mut keystore = Self::new(store_password);
        keystore.add_key(alias, key_password, &SecretKey::generate());
        keystore
    }

    /// Add (or replace) an aliased key.
    pub fn add_key(&mut self, alias: &str, key_password: &str, secret: &SecretKey) {
        self.file.entries.retain(|e| e.alias != alias);
        self.file.entries.push(KeystoreEntry {
            alias: alias.to_string(),
            key_password_sha256: password_digest(key_password),
            secret_key: secret.to_base64(),
        });
    }

    /// Parse keystore bytes without unlocking anything.
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        let file: KeystoreFile = serde_json::from_slice(bytes)
            .map_err(|e| SignerError::InvalidKeystore(format!("malformed keystore: {e}")))?;

        if file.format != KEYSTORE_FORMAT {
            return Err(SignerError::InvalidKeystore(format!(
                "unsupported keystore format: {}",
                file.format
            )));
        }
        if file.entries.is_empty() {
            return Err(SignerError::InvalidKeystore(
                "keystore contains no keys".to_string(),
            ));
        }

        Ok(Self { file })
    }

    /// Serialize the keystore.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.file).unwrap_or_default()
    }

    /// Aliases stored in this keystore.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.file.entries.iter().map(|e| e.alias.as_str())
    }

    /// Unlock the key named by `config`.
    ///
    /// Checks run in order: store password, alias, key password.
    pub fn unlock(&self, config: &SigningConfig) -> SignerResult<KeyPair> {
        if !password_matches(&config.store_password, &self.file.store_password_sha256) {
            return Err(SignerError::StorePasswordMismatch);
        }

        let entry = self
            .file
            .entries
            .iter()
            .find(|e| e.alias == config.key_alias)
            .ok_or_else(|| SignerError::AliasNotFound(config.key_alias.clone()))?;

        if !password_matches(&config.key_password, &entry.key_password_sha256) {
            return Err(SignerError::KeyPasswordMismatch(entry.alias.clone()));
        }

        let secret = SecretKey::from_base64(&entry.secret_key)?;
        Ok(KeyPair::from_secret(entry.alias.clone(), secret))
    }

    /// Parse and unlock in one step.
    pub fn open(bytes: &[u8], config: &SigningConfig) -> SignerResult<KeyPair> {
        Self::from_bytes(bytes)?.unlock(config)
    }
}
