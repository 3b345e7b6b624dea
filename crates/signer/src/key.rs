//! Ed25519 key types and operations.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// A secret (private) key for signing.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse from a base64-encoded 32-byte seed.
    pub fn from_base64(s: &str) -> SignerResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;

        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SignerError::KeyParsing(format!("expected 32 bytes, got {}", bytes.len()))
        })?;

        Ok(Self {
            inner: SigningKey::from_bytes(&seed),
        })
    }

    /// Encode the seed as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes())
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A public key for verification.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse from raw 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            SignerError::KeyParsing(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))?;
        Ok(Self { inner })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Certificate fingerprint: SHA-256 of the public key, lowercase hex.
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.inner.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.fingerprint()[..16])
    }
}

/// An unlocked keystore entry.
pub struct KeyPair {
    /// Alias the key was stored under.
    pub alias: String,
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair under the given alias.
    pub fn generate(alias: impl Into<String>) -> Self {
        Self::from_secret(alias, SecretKey::generate())
    }

    pub fn from_secret(alias: impl Into<String>, secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self {
            alias: alias.into(),
            secret,
            public,
        }
    }

    /// Fingerprint of the public half.
    pub fn fingerprint(&self) -> String {
        self.public.fingerprint()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("alias", &self.alias)
            .field("public", &self.public)
            .finish()
    }
}

/// Normalize a claimed fingerprint: drop `:` separators and whitespace,
/// lowercase the rest.
pub fn normalize_fingerprint(claimed: &str) -> String {
    claimed
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare a claimed fingerprint against the actual one in constant time.
pub fn fingerprints_match(claimed: &str, actual: &str) -> bool {
    let claimed = normalize_fingerprint(claimed);
    let actual = normalize_fingerprint(actual);
    constant_time_eq(claimed.as_bytes(), actual.as_bytes())
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
