//! Bundle identity, signing configuration, and stored bundle records.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of an application id or variant name.
pub const MAX_NAME_LEN: usize = 255;

/// Identity of an uploaded bundle: (application id, variant, version code).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleId {
    pub application_id: String,
    pub variant: String,
    pub version_code: i64,
}

impl BundleId {
    /// Build and validate a bundle identity.
    pub fn new(
        application_id: impl Into<String>,
        variant: impl Into<String>,
        version_code: i64,
    ) -> crate::Result<Self> {
        let id = Self {
            application_id: application_id.into(),
            variant: variant.into(),
            version_code,
        };
        id.validate()?;
        Ok(id)
    }

    /// Parse a version code from its textual form.
    pub fn parse_version(s: &str) -> crate::Result<i64> {
        s.trim()
            .parse::<i64>()
            .map_err(|e| crate::Error::InvalidIdentity(format!("invalid version '{s}': {e}")))
    }

    /// Validate identity invariants.
    ///
    /// Names end up as storage key segments, so only a conservative character
    /// set is accepted.
    pub fn validate(&self) -> crate::Result<()> {
        validate_name("application id", &self.application_id)?;
        validate_name("variant", &self.variant)?;
        if self.version_code < 0 {
            return Err(crate::Error::InvalidIdentity(format!(
                "version must be non-negative, got {}",
                self.version_code
            )));
        }
        Ok(())
    }

    /// Storage key prefix under which everything for this identity lives.
    pub fn storage_prefix(&self) -> String {
        format!(
            "bundles/{}/{}/{}",
            self.application_id, self.variant, self.version_code
        )
    }

    /// Storage key of the current record pointer.
    pub fn record_key(&self) -> String {
        format!("{}/record.json", self.storage_prefix())
    }

    /// Storage key prefix of one uploaded revision's blobs.
    pub fn revision_prefix(&self, revision: &Revision) -> String {
        format!("{}/{}", self.storage_prefix(), revision)
    }

    /// Storage key prefix of persisted split archives derived from one revision.
    pub fn splits_prefix(&self, revision: &Revision) -> String {
        format!(
            "splits/{}/{}/{}/{}",
            self.application_id, self.variant, self.version_code, revision
        )
    }
}

fn validate_name(what: &str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::InvalidIdentity(format!("{what} is empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(crate::Error::InvalidIdentity(format!(
            "{what} exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if value.starts_with('.') {
        return Err(crate::Error::InvalidIdentity(format!(
            "{what} must not start with '.'"
        )));
    }
    if value.contains("..") {
        return Err(crate::Error::InvalidIdentity(format!(
            "{what} must not contain '..'"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(crate::Error::InvalidIdentity(format!(
            "{what} contains invalid characters: {value}"
        )));
    }
    Ok(())
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({self})")
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.application_id, self.variant, self.version_code
        )
    }
}

/// Content version of a bundle record. A new revision is minted on every
/// successful upload, including overrides of an existing identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(Uuid);

impl Revision {
    /// Mint a new revision.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidIdentity(format!("invalid revision: {e}")))
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secrets needed to unlock the signing key inside an uploaded keystore.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningConfig {
    pub key_alias: String,
    pub store_password: String,
    pub key_password: String,
}

impl SigningConfig {
    /// Check that all three secrets are present.
    pub fn validate(&self) -> crate::Result<()> {
        let missing: Vec<&str> = [
            ("keyAlias", &self.key_alias),
            ("storePassword", &self.store_password),
            ("keyPassword", &self.key_password),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::InvalidSigningConfig(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("key_alias", &self.key_alias)
            .field("store_password", &"[REDACTED]")
            .field("key_password", &"[REDACTED]")
            .finish()
    }
}

/// A stored bundle and everything needed to derive signed splits from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRecord {
    pub id: BundleId,
    pub revision: Revision,
    /// Storage key of the bundle bytes.
    pub bundle_key: String,
    /// Storage key of the keystore bytes.
    pub keystore_key: String,
    pub signing_config: SigningConfig,
    pub bundle_sha256: ContentHash,
    pub bundle_size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

impl BundleRecord {
    /// Public view of the record, with signing secrets stripped.
    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            application_id: self.id.application_id.clone(),
            variant: self.id.variant.clone(),
            version_code: self.id.version_code,
            revision: self.revision.to_string(),
            key_alias: self.signing_config.key_alias.clone(),
            bundle_sha256: self.bundle_sha256.to_hex(),
            bundle_size: self.bundle_size,
            uploaded_at: self.uploaded_at,
        }
    }
}

/// Bundle record metadata safe to return to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub application_id: String,
    pub variant: String,
    pub version_code: i64,
    pub revision: String,
    pub key_alias: String,
    pub bundle_sha256: String,
    pub bundle_size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}
