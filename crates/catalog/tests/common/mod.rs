use bytes::Bytes;
use splitstore_catalog::{BundleStore, BundleUpload};
use splitstore_core::config::BundlesConfig;
use splitstore_core::{BundleId, SigningConfig};
use splitstore_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestCatalog {
    pub bundles: Arc<BundleStore>,
    pub storage: Arc<dyn ObjectStore>,
    _dir: TempDir,
}

impl TestCatalog {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(dir.path())
                .await
                .expect("filesystem backend"),
        );
        let config = BundlesConfig {
            override_existing: false,
            retired_revision_grace_secs: 0,
        };
        Self {
            bundles: Arc::new(BundleStore::new(storage.clone(), &config)),
            storage,
            _dir: dir,
        }
    }
}

pub fn bundle_id(app: &str) -> BundleId {
    BundleId::new(app, "release", 1).expect("valid id")
}

pub fn upload(app: &str, bundle: impl Into<Bytes>) -> BundleUpload {
    BundleUpload {
        id: bundle_id(app),
        bundle: bundle.into(),
        keystore: Bytes::from_static(b"keystore"),
        signing_config: SigningConfig {
            key_alias: "upload".to_string(),
            store_password: "store-pw".to_string(),
            key_password: "key-pw".to_string(),
        },
    }
}
