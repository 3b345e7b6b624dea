//! Device capability profiles and registrations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Declared capability profile of a requesting device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// ABIs in order of preference.
    #[serde(default)]
    pub supported_abis: Vec<String>,
    /// Locales in order of preference.
    #[serde(default)]
    pub supported_locales: Vec<String>,
    #[serde(default)]
    pub device_features: Vec<String>,
    #[serde(default)]
    pub gl_extensions: Vec<String>,
    pub screen_density: i32,
    pub sdk_version: i32,
}

impl DeviceSpec {
    /// Validate the spec before it is used for generation or registration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.supported_abis.is_empty() {
            return Err(crate::Error::InvalidDeviceSpec(
                "supportedAbis must list at least one ABI".to_string(),
            ));
        }
        if self.screen_density <= 0 {
            return Err(crate::Error::InvalidDeviceSpec(format!(
                "screenDensity must be positive, got {}",
                self.screen_density
            )));
        }
        if self.sdk_version <= 0 {
            return Err(crate::Error::InvalidDeviceSpec(format!(
                "sdkVersion must be positive, got {}",
                self.sdk_version
            )));
        }
        for (field, values) in [
            ("supportedAbis", &self.supported_abis),
            ("supportedLocales", &self.supported_locales),
            ("deviceFeatures", &self.device_features),
            ("glExtensions", &self.gl_extensions),
        ] {
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(crate::Error::InvalidDeviceSpec(format!(
                    "{field} contains an empty entry"
                )));
            }
        }
        Ok(())
    }

    /// Canonical form used as cache key material.
    ///
    /// Ordered lists keep their first occurrence of each entry, set-like
    /// fields are sorted.
    pub fn normalized(&self) -> DeviceSpec {
        DeviceSpec {
            supported_abis: dedup_ordered(&self.supported_abis),
            supported_locales: dedup_ordered(&self.supported_locales),
            device_features: sorted_set(&self.device_features),
            gl_extensions: sorted_set(&self.gl_extensions),
            screen_density: self.screen_density,
            sdk_version: self.sdk_version,
        }
    }
}

fn dedup_ordered(values: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

fn sorted_set(values: &[String]) -> Vec<String> {
    values
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Opaque device identifier handed out by `/register`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generate a new random device id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidDeviceId(e.to_string()))
    }

    /// Storage key of the persisted registration.
    pub fn storage_key(&self) -> String {
        format!("devices/{}.json", self.0)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered device. Never mutated after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_id: DeviceId,
    pub device_spec: DeviceSpec,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
