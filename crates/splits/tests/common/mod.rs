#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use splitstore_catalog::{BundleStore, BundleUpload};
use splitstore_core::config::{BundlesConfig, CacheConfig};
use splitstore_core::{BundleId, DeviceSpec, SigningConfig, SplitApk, SplitRequest};
use splitstore_signer::{Keystore, KeystoreSigner};
use splitstore_splits::archive;
use splitstore_splits::{
    BundleSource, LayoutEngine, SplitCache, SplitCoordinator, SplitEngine, SplitError, SplitResult,
};
use splitstore_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Wraps the layout engine with a call counter, an optional delay, an
/// injectable failure and a gate for devices at a given density.
pub struct CountingEngine {
    inner: LayoutEngine,
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail_next: AtomicBool,
    pub gated_density: Option<i32>,
    pub gate: Semaphore,
}

impl CountingEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: LayoutEngine::new(),
            calls: AtomicUsize::new(0),
            delay,
            fail_next: AtomicBool::new(false),
            gated_density: None,
            gate: Semaphore::new(0),
        }
    }

    pub fn gated(density: i32) -> Self {
        Self {
            gated_density: Some(density),
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SplitEngine for CountingEngine {
    async fn generate(
        &self,
        bundle: BundleSource,
        request: &SplitRequest,
    ) -> SplitResult<Vec<SplitApk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.gated_density == Some(request.device_spec.screen_density) {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SplitError::Generation(e.to_string()))?;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SplitError::Generation("injected failure".to_string()));
        }
        self.inner.generate(bundle, request).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

pub struct Harness {
    pub storage: Arc<dyn ObjectStore>,
    pub bundles: Arc<BundleStore>,
    pub cache: Arc<SplitCache>,
    pub engine: Arc<CountingEngine>,
    pub coordinator: SplitCoordinator,
    pub keystore: Bytes,
    dir: Arc<TempDir>,
}

impl Harness {
    pub async fn new(engine: CountingEngine) -> Self {
        let dir = Arc::new(TempDir::new().expect("tempdir"));
        let keystore = Bytes::from(Keystore::generate("upload", "store-pw", "key-pw").to_bytes());
        Self::build(dir, Arc::new(engine), keystore).await
    }

    /// A second harness over the same storage, with empty memory state.
    pub async fn reopen(&self, engine: CountingEngine) -> Self {
        Self::build(self.dir.clone(), Arc::new(engine), self.keystore.clone()).await
    }

    async fn build(dir: Arc<TempDir>, engine: Arc<CountingEngine>, keystore: Bytes) -> Self {
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(dir.path())
                .await
                .expect("filesystem backend"),
        );
        let cache = Arc::new(SplitCache::new(storage.clone(), &CacheConfig::default()));
        let bundles_config = BundlesConfig {
            override_existing: true,
            retired_revision_grace_secs: 0,
        };
        let bundles =
            Arc::new(BundleStore::new(storage.clone(), &bundles_config).with_listener(cache.clone()));
        let coordinator = SplitCoordinator::new(
            bundles.clone(),
            cache.clone(),
            engine.clone(),
            Arc::new(KeystoreSigner),
        );
        Self {
            storage,
            bundles,
            cache,
            engine,
            coordinator,
            keystore,
            dir,
        }
    }

    pub async fn upload(&self, id: &BundleId, bundle: Bytes) {
        self.bundles
            .upload(
                BundleUpload {
                    id: id.clone(),
                    bundle,
                    keystore: self.keystore.clone(),
                    signing_config: signing_config(),
                },
                true,
            )
            .await
            .expect("upload");
    }
}

pub fn signing_config() -> SigningConfig {
    SigningConfig {
        key_alias: "upload".to_string(),
        store_password: "store-pw".to_string(),
        key_password: "key-pw".to_string(),
    }
}

pub fn bundle_id() -> BundleId {
    BundleId::new("application", "variant", 23).expect("valid id")
}

/// A base module plus an on-demand `ondemandfeature`, with language and
/// density resources in both.
pub fn sample_bundle(marker: &str) -> Bytes {
    let master = format!("base-dex-{marker}");
    archive::pack([
        ("base/master/classes.dex", master.as_bytes()),
        ("base/lang-it/strings.xml", b"ciao".as_slice()),
        ("base/lang-de/strings.xml", b"hallo".as_slice()),
        ("base/lang-ko/strings.xml", b"annyeong".as_slice()),
        ("base/density-xhdpi/icon.png", b"icon-xhdpi".as_slice()),
        ("base/density-xxhdpi/icon.png", b"icon-xxhdpi".as_slice()),
        ("base/abi-arm64-v8a/libapp.so", b"arm64".as_slice()),
        (
            "ondemandfeature/module.json",
            br#"{"delivery":"on-demand"}"#.as_slice(),
        ),
        ("ondemandfeature/master/classes.dex", b"feature-dex".as_slice()),
        ("ondemandfeature/lang-it/strings.xml", b"feature-it".as_slice()),
        ("ondemandfeature/lang-de/strings.xml", b"feature-de".as_slice()),
        ("ondemandfeature/lang-ko/strings.xml", b"feature-ko".as_slice()),
        ("ondemandfeature/density-xxhdpi/art.png", b"feature-art".as_slice()),
    ])
    .expect("pack bundle")
}

pub fn device(density: i32) -> DeviceSpec {
    DeviceSpec {
        supported_abis: vec!["arm64-v8a".to_string()],
        supported_locales: vec!["en-US".to_string()],
        device_features: vec![],
        gl_extensions: vec![],
        screen_density: density,
        sdk_version: 34,
    }
}

pub fn request(density: i32, modules: &[&str], languages: &[&str]) -> SplitRequest {
    SplitRequest::new(
        device(density),
        modules.iter().map(|s| s.to_string()),
        languages.iter().map(|s| s.to_string()),
        false,
    )
}
