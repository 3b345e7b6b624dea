//! Split APK sets, generation requests and cache keys.

use crate::bundle::{BundleId, Revision};
use crate::device::DeviceSpec;
use crate::hash::ContentHash;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// One named, installable APK.
#[derive(Clone, PartialEq, Eq)]
pub struct SplitApk {
    pub name: String,
    pub data: Bytes,
}

impl SplitApk {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> crate::Result<Self> {
        let name = name.into();
        validate_split_name(&name)?;
        Ok(Self {
            name,
            data: data.into(),
        })
    }
}

impl fmt::Debug for SplitApk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitApk")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Split names become archive entry names; keep them to a single safe
/// path component ending in `.apk`.
pub fn validate_split_name(name: &str) -> crate::Result<()> {
    let Some(stem) = name.strip_suffix(".apk") else {
        return Err(crate::Error::InvalidSplitName(format!(
            "{name} does not end in .apk"
        )));
    };
    if stem.is_empty() || stem.starts_with('.') {
        return Err(crate::Error::InvalidSplitName(name.to_string()));
    }
    if !stem
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(crate::Error::InvalidSplitName(name.to_string()));
    }
    Ok(())
}

/// A complete, immutable set of signed splits, sorted by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitSet {
    apks: Vec<SplitApk>,
}

impl SplitSet {
    /// Build a set, sorting by name and rejecting duplicate names.
    pub fn new(mut apks: Vec<SplitApk>) -> crate::Result<Self> {
        apks.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = apks.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(crate::Error::InvalidSplitName(format!(
                "duplicate split {}",
                dup[0].name
            )));
        }
        Ok(Self { apks })
    }

    pub fn apks(&self) -> &[SplitApk] {
        &self.apks
    }

    pub fn names(&self) -> Vec<&str> {
        self.apks.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SplitApk> {
        self.apks
            .binary_search_by(|a| a.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.apks[i])
    }

    pub fn len(&self) -> usize {
        self.apks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apks.is_empty()
    }

    /// Sum of all APK sizes.
    pub fn total_bytes(&self) -> u64 {
        self.apks.iter().map(|a| a.data.len() as u64).sum()
    }
}

/// Device/module/language selection of a download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitRequest {
    pub device_spec: DeviceSpec,
    /// Requested on-demand modules. The base module is always included.
    pub modules: BTreeSet<String>,
    pub languages: BTreeSet<String>,
    pub include_missing: bool,
}

impl SplitRequest {
    pub fn new(
        device_spec: DeviceSpec,
        modules: impl IntoIterator<Item = String>,
        languages: impl IntoIterator<Item = String>,
        include_missing: bool,
    ) -> Self {
        Self {
            device_spec,
            modules: clean(modules),
            languages: clean(languages),
            include_missing,
        }
    }

    /// Validate the device spec and every requested language tag.
    pub fn validate(&self) -> crate::Result<()> {
        self.device_spec.validate()?;
        if let Some(bad) = self.languages.iter().find(|l| !is_language_tag(l)) {
            return Err(crate::Error::InvalidLanguage(bad.clone()));
        }
        Ok(())
    }
}

/// Whether `tag` has the shape of a BCP 47 language tag: a two or three
/// letter primary subtag, then alphanumeric subtags separated by `-` or `_`.
///
/// Split names are built from these tags, so words like `master`, density
/// buckets and ABI names never qualify.
pub fn is_language_tag(tag: &str) -> bool {
    let mut subtags = tag.split(['-', '_']);
    let primary = subtags.next().unwrap_or_default();
    (2..=3).contains(&primary.len())
        && primary.chars().all(|c| c.is_ascii_alphabetic())
        && subtags.all(|s| (1..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn clean(values: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Canonical hash identifying a split set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(ContentHash);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKeyMaterial<'a> {
    application_id: &'a str,
    variant: &'a str,
    version_code: i64,
    revision: String,
    device_spec: DeviceSpec,
    modules: &'a BTreeSet<String>,
    languages: &'a BTreeSet<String>,
    include_missing: bool,
}

impl CacheKey {
    /// Derive the key for `request` against one revision of `id`.
    pub fn compute(id: &BundleId, revision: &Revision, request: &SplitRequest) -> Self {
        let material = CacheKeyMaterial {
            application_id: &id.application_id,
            variant: &id.variant,
            version_code: id.version_code,
            revision: revision.to_string(),
            device_spec: request.device_spec.normalized(),
            modules: &request.modules,
            languages: &request.languages,
            include_missing: request.include_missing,
        };
        // Struct fields serialize in declaration order and the collections
        // are already sorted, so the encoding is canonical.
        let encoded = serde_json::to_vec(&material).unwrap_or_default();
        Self(ContentHash::compute(&encoded))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DeviceSpec {
        DeviceSpec {
            supported_abis: vec!["arm64-v8a".to_string()],
            supported_locales: vec!["en".to_string()],
            device_features: vec!["b".to_string(), "a".to_string()],
            gl_extensions: vec![],
            screen_density: 480,
            sdk_version: 34,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_key_ignores_order_and_duplicates() {
        let id = BundleId::new("app", "release", 1).unwrap();
        let rev = Revision::new();

        let a = SplitRequest::new(spec(), strings(&["f1", "f2"]), strings(&["it", "de"]), false);
        let mut reordered = spec();
        reordered.device_features = strings(&["a", "b", "a"]);
        let b = SplitRequest::new(
            reordered,
            strings(&["f2", "f1", "f1"]),
            strings(&["de", " it "]),
            false,
        );

        assert_eq!(
            CacheKey::compute(&id, &rev, &a),
            CacheKey::compute(&id, &rev, &b)
        );
    }

    #[test]
    fn test_cache_key_changes_with_inputs() {
        let id = BundleId::new("app", "release", 1).unwrap();
        let rev = Revision::new();
        let base = SplitRequest::new(spec(), Vec::new(), strings(&["it"]), false);
        let key = CacheKey::compute(&id, &rev, &base);

        assert_ne!(key, CacheKey::compute(&id, &Revision::new(), &base));

        let mut missing = base.clone();
        missing.include_missing = true;
        assert_ne!(key, CacheKey::compute(&id, &rev, &missing));

        let mut density = base.clone();
        density.device_spec.screen_density = 160;
        assert_ne!(key, CacheKey::compute(&id, &rev, &density));

        let other_version = BundleId::new("app", "release", 2).unwrap();
        assert_ne!(key, CacheKey::compute(&other_version, &rev, &base));
    }

    #[test]
    fn test_language_tags() {
        for tag in ["it", "de-DE", "zh_Hant_TW", "fil", "es-419"] {
            assert!(is_language_tag(tag), "{tag}");
        }
        for tag in [
            "master", "xxhdpi", "ldpi", "arm64-v8a", "x86_64", "it/x", "d", "de-", "",
        ] {
            assert!(!is_language_tag(tag), "{tag}");
        }
    }

    #[test]
    fn test_request_rejects_split_dimension_names_as_languages() {
        let ok = SplitRequest::new(spec(), Vec::new(), strings(&["it", "pt-BR"]), true);
        assert!(ok.validate().is_ok());

        for bad in ["master", "xxhdpi", "it/x"] {
            let request = SplitRequest::new(spec(), Vec::new(), strings(&[bad]), true);
            assert!(matches!(
                request.validate(),
                Err(crate::Error::InvalidLanguage(_))
            ));
        }
    }

    #[test]
    fn test_split_set_sorted_and_unique() {
        let set = SplitSet::new(vec![
            SplitApk::new("feature-master.apk", b"f".to_vec()).unwrap(),
            SplitApk::new("base-master.apk", b"b".to_vec()).unwrap(),
        ])
        .unwrap();
        assert_eq!(set.names(), vec!["base-master.apk", "feature-master.apk"]);
        assert_eq!(set.get("feature-master.apk").unwrap().data.as_ref(), b"f");
        assert_eq!(set.total_bytes(), 2);

        let dup = SplitSet::new(vec![
            SplitApk::new("base-master.apk", b"1".to_vec()).unwrap(),
            SplitApk::new("base-master.apk", b"2".to_vec()).unwrap(),
        ]);
        assert!(dup.is_err());
    }

    #[test]
    fn test_split_name_validation() {
        assert!(validate_split_name("base-xxhdpi.apk").is_ok());
        assert!(validate_split_name("base").is_err());
        assert!(validate_split_name(".apk").is_err());
        assert!(validate_split_name("../base.apk").is_err());
        assert!(validate_split_name("dir/base.apk").is_err());
    }
}
