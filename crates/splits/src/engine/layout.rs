//! Built-in engine for tar-packaged module layouts.
//!
//! Bundle layout:
//!
//! ```text
//! {module}/module.json              optional, {"delivery": "install-time" | "on-demand"}
//! {module}/master/{file}
//! {module}/lang-{language}/{file}
//! {module}/density-{bucket}/{file}
//! {module}/abi-{abi}/{file}
//! ```
//!
//! Each emitted split is itself a deterministic tar of its dimension's files.

use crate::archive;
use crate::engine::{BundleSource, SplitEngine};
use crate::error::{SplitError, SplitResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use splitstore_core::{SplitApk, SplitRequest, is_language_tag};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const BASE_MODULE: &str = "base";
const MODULE_MANIFEST: &str = "module.json";

/// Density buckets and their nominal dpi.
const DENSITY_BUCKETS: &[(&str, i32)] = &[
    ("ldpi", 120),
    ("mdpi", 160),
    ("tvdpi", 213),
    ("hdpi", 240),
    ("xhdpi", 320),
    ("xxhdpi", 480),
    ("xxxhdpi", 640),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Delivery {
    #[default]
    InstallTime,
    OnDemand,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleManifest {
    #[serde(default)]
    delivery: Delivery,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Dimension {
    Master,
    Language(String),
    Density(&'static str),
    Abi(String),
}

impl Dimension {
    fn parse(s: &str) -> Option<Self> {
        if s == "master" {
            return Some(Self::Master);
        }
        if let Some(lang) = s.strip_prefix("lang-") {
            return Some(Self::Language(language_key(lang)));
        }
        if let Some(bucket) = s.strip_prefix("density-") {
            return DENSITY_BUCKETS
                .iter()
                .find(|(name, _)| *name == bucket)
                .map(|(name, _)| Self::Density(*name));
        }
        s.strip_prefix("abi-").map(|abi| Self::Abi(abi.to_string()))
    }
}

#[derive(Debug, Default)]
struct Module {
    delivery: Delivery,
    files: BTreeMap<Dimension, Vec<(String, Bytes)>>,
}

impl Module {
    fn split(&self, dimension: &Dimension) -> SplitResult<Option<Bytes>> {
        match self.files.get(dimension) {
            Some(files) => Ok(Some(archive::pack(
                files.iter().map(|(name, data)| (name.as_str(), data.as_ref())),
            )?)),
            None => Ok(None),
        }
    }

    fn best_density(&self, screen_density: i32) -> Option<&'static str> {
        let available: Vec<_> = DENSITY_BUCKETS
            .iter()
            .filter(|(name, _)| self.files.contains_key(&Dimension::Density(*name)))
            .collect();
        available
            .iter()
            .find(|(_, dpi)| *dpi >= screen_density)
            .or_else(|| available.last())
            .map(|(name, _)| *name)
    }
}

/// Primary language subtag, lowercased: `it-IT` becomes `it`.
fn language_key(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_ascii_lowercase()
}

fn parse_layout(bundle: &[u8]) -> SplitResult<BTreeMap<String, Module>> {
    let mut modules: BTreeMap<String, Module> = BTreeMap::new();

    for (path, data) in archive::unpack(bundle)? {
        let mut parts = path.splitn(3, '/');
        let (Some(module), Some(second)) = (parts.next(), parts.next()) else {
            return Err(SplitError::Generation(format!(
                "unexpected bundle entry {path}"
            )));
        };
        let entry = modules.entry(module.to_string()).or_default();

        match parts.next() {
            None if second == MODULE_MANIFEST => {
                let manifest: ModuleManifest = serde_json::from_slice(&data).map_err(|e| {
                    SplitError::Generation(format!("invalid {module}/{MODULE_MANIFEST}: {e}"))
                })?;
                entry.delivery = manifest.delivery;
            }
            Some(file) if !file.is_empty() => {
                let dimension = Dimension::parse(second).ok_or_else(|| {
                    SplitError::Generation(format!("unknown dimension {second} in {module}"))
                })?;
                entry
                    .files
                    .entry(dimension)
                    .or_default()
                    .push((file.to_string(), data));
            }
            _ => {
                return Err(SplitError::Generation(format!(
                    "unexpected bundle entry {path}"
                )));
            }
        }
    }

    if !modules.contains_key(BASE_MODULE) {
        return Err(SplitError::Generation(
            "bundle has no base module".to_string(),
        ));
    }
    Ok(modules)
}

/// Reference engine over the module layout above.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutEngine;

impl LayoutEngine {
    pub fn new() -> Self {
        Self
    }

    fn generate_sync(bundle: &[u8], request: &SplitRequest) -> SplitResult<Vec<SplitApk>> {
        let modules = parse_layout(bundle)?;

        if let Some(unknown) = request
            .modules
            .iter()
            .find(|m| !modules.contains_key(m.as_str()))
        {
            return Err(SplitError::Validation(format!("unknown module {unknown}")));
        }

        let languages: BTreeSet<String> = if request.languages.is_empty() {
            request
                .device_spec
                .supported_locales
                .iter()
                .map(String::as_str)
                .filter(|locale| is_language_tag(locale))
                .map(language_key)
                .collect()
        } else {
            request
                .languages
                .iter()
                .map(String::as_str)
                .map(language_key)
                .collect()
        };

        let selected = modules.iter().filter(|(name, module)| {
            name.as_str() == BASE_MODULE
                || module.delivery == Delivery::InstallTime
                || request.modules.contains(name.as_str())
        });

        let mut apks = Vec::new();
        let mut emit = |module: &str, suffix: &str, data: Bytes| -> SplitResult<()> {
            let apk = SplitApk::new(format!("{module}-{suffix}.apk"), data)
                .map_err(|e| SplitError::Generation(e.to_string()))?;
            apks.push(apk);
            Ok(())
        };

        for (name, module) in selected {
            let master = module
                .split(&Dimension::Master)?
                .map_or_else(|| archive::pack(std::iter::empty()), Ok)?;
            emit(name.as_str(), "master", master)?;

            for language in &languages {
                match module.split(&Dimension::Language(language.clone()))? {
                    Some(data) => emit(name.as_str(), language.as_str(), data)?,
                    None if request.include_missing => {
                        let empty = archive::pack(std::iter::empty())?;
                        emit(name.as_str(), language.as_str(), empty)?
                    }
                    None => {}
                }
            }

            if let Some(bucket) = module.best_density(request.device_spec.screen_density)
                && let Some(data) = module.split(&Dimension::Density(bucket))?
            {
                emit(name.as_str(), bucket, data)?;
            }

            let abi = request
                .device_spec
                .supported_abis
                .iter()
                .find(|abi| module.files.contains_key(&Dimension::Abi(abi.to_string())));
            if let Some(abi) = abi
                && let Some(data) = module.split(&Dimension::Abi(abi.clone()))?
            {
                emit(name.as_str(), abi.as_str(), data)?;
            }
        }

        debug!(splits = apks.len(), "Layout engine produced splits");
        Ok(apks)
    }
}

#[async_trait]
impl SplitEngine for LayoutEngine {
    async fn generate(
        &self,
        bundle: BundleSource,
        request: &SplitRequest,
    ) -> SplitResult<Vec<SplitApk>> {
        let bundle = bundle.into_bytes().await?;
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::generate_sync(&bundle, &request))
            .await
            .map_err(|e| SplitError::Generation(format!("layout engine task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "builtin"
    }
}
