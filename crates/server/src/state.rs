//! Application state.

use splitstore_catalog::{BundleStore, DeviceRegistry};
use splitstore_core::config::AppConfig;
use splitstore_signer::{ApkSigner, KeystoreSigner};
use splitstore_splits::{SplitCache, SplitCoordinator, SplitEngine};
use splitstore_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Bundle records and blobs.
    pub bundles: Arc<BundleStore>,
    /// Device registrations.
    pub devices: Arc<DeviceRegistry>,
    /// Split cache, kept for inspection.
    pub cache: Arc<SplitCache>,
    /// Split resolution.
    pub coordinator: SplitCoordinator,
}

impl AppState {
    /// Wire up the catalog and split pipeline over `storage`.
    ///
    /// The engine is selected from `config.engine`.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let engine = splitstore_splits::engine::from_config(&config.engine);
        Self::with_engine(config, storage, engine)
    }

    /// Like [`AppState::new`] with an explicit engine.
    pub fn with_engine(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        engine: Arc<dyn SplitEngine>,
    ) -> Self {
        let cache = Arc::new(SplitCache::new(storage.clone(), &config.cache));
        let bundles = Arc::new(
            BundleStore::new(storage.clone(), &config.bundles).with_listener(cache.clone()),
        );
        let devices = Arc::new(DeviceRegistry::new(storage.clone()));
        let signer: Arc<dyn ApkSigner> = Arc::new(KeystoreSigner);
        let coordinator = SplitCoordinator::new(bundles.clone(), cache.clone(), engine, signer);

        tracing::info!(
            storage = storage.backend_name(),
            cache_entries = config.cache.max_entries,
            persist_splits = config.cache.persist,
            override_existing = config.bundles.override_existing,
            "Application state initialized"
        );

        Self {
            config: Arc::new(config),
            storage,
            bundles,
            devices,
            cache,
            coordinator,
        }
    }
}
