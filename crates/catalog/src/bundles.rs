//! Bundle store: uploads, record pointers and retired revisions.
//!
//! Each identity has one `record.json` pointing at the blobs of its current
//! revision. Uploads write blobs under a fresh revision prefix first, then
//! atomically create or replace the record, so readers observe either the
//! old record or the new one in full.

use crate::error::{CatalogError, CatalogResult};
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use splitstore_core::config::BundlesConfig;
use splitstore_core::{BundleId, BundleRecord, ContentHash, Revision, SigningConfig};
use splitstore_storage::{ByteStream, ObjectStore, StorageError, WriteMode};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BUNDLE_FILE: &str = "bundle.aab";
const KEYSTORE_FILE: &str = "keystore.json";

/// Observer notified when an upload replaces a record.
pub trait RevisionListener: Send + Sync + 'static {
    /// `retired` is no longer the live revision of `id`.
    fn revision_retired(&self, id: &BundleId, retired: &Revision);
}

/// Input of a bundle upload.
#[derive(Clone)]
pub struct BundleUpload {
    pub id: BundleId,
    pub bundle: Bytes,
    pub keystore: Bytes,
    pub signing_config: SigningConfig,
}

impl std::fmt::Debug for BundleUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleUpload")
            .field("id", &self.id)
            .field("bundle_len", &self.bundle.len())
            .field("keystore_len", &self.keystore.len())
            .field("signing_config", &self.signing_config)
            .finish()
    }
}

impl BundleUpload {
    fn validate(&self) -> CatalogResult<()> {
        self.id.validate()?;
        if self.bundle.is_empty() {
            return Err(CatalogError::Validation("bundle is empty".to_string()));
        }
        if self.keystore.is_empty() {
            return Err(CatalogError::Validation("keystore is empty".to_string()));
        }
        self.signing_config.validate()?;
        Ok(())
    }
}

/// Acknowledgement returned by a successful upload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub application_id: String,
    pub variant: String,
    pub version_code: i64,
    pub revision: String,
    pub bundle_sha256: String,
    pub bundle_size: u64,
    /// Whether an existing record was replaced.
    pub replaced: bool,
}

/// Stores bundles and tracks the live record of every identity.
pub struct BundleStore {
    storage: Arc<dyn ObjectStore>,
    records: DashMap<BundleId, Arc<BundleRecord>>,
    upload_locks: DashMap<BundleId, Arc<Mutex<()>>>,
    listeners: Vec<Arc<dyn RevisionListener>>,
    retired_grace: Duration,
}

impl BundleStore {
    pub fn new(storage: Arc<dyn ObjectStore>, config: &BundlesConfig) -> Self {
        Self {
            storage,
            records: DashMap::new(),
            upload_locks: DashMap::new(),
            listeners: Vec::new(),
            retired_grace: config.retired_revision_grace(),
        }
    }

    /// Register a listener for retired revisions.
    pub fn with_listener(mut self, listener: Arc<dyn RevisionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    /// Store a bundle, creating or (when `allow_override`) replacing the
    /// identity's record.
    pub async fn upload(
        &self,
        upload: BundleUpload,
        allow_override: bool,
    ) -> CatalogResult<UploadAck> {
        upload.validate()?;
        let id = upload.id.clone();

        let lock = self
            .upload_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.upload_locked(upload, allow_override).await
        };
        drop(lock);
        self.upload_locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn upload_locked(
        &self,
        upload: BundleUpload,
        allow_override: bool,
    ) -> CatalogResult<UploadAck> {
        let BundleUpload {
            id,
            bundle,
            keystore,
            signing_config,
        } = upload;

        let existing = self.current(&id).await?;
        if existing.is_some() && !allow_override {
            return Err(CatalogError::Conflict(id.to_string()));
        }

        let revision = Revision::new();
        let prefix = id.revision_prefix(&revision);
        let bundle_key = format!("{prefix}/{BUNDLE_FILE}");
        let keystore_key = format!("{prefix}/{KEYSTORE_FILE}");
        let bundle_sha256 = ContentHash::compute(&bundle);
        let bundle_size = bundle.len() as u64;

        let record = BundleRecord {
            id: id.clone(),
            revision,
            bundle_key,
            keystore_key,
            signing_config,
            bundle_sha256,
            bundle_size,
            uploaded_at: OffsetDateTime::now_utc(),
        };

        if let Err(e) = self.write_revision(&record, bundle, keystore, existing.is_some()).await {
            self.discard_revision(&id, &revision).await;
            return Err(e);
        }

        let record = Arc::new(record);
        self.records.insert(id.clone(), record.clone());

        if let Some(old) = &existing {
            info!(
                bundle = %id,
                retired = %old.revision,
                revision = %revision,
                "Bundle replaced"
            );
            for listener in &self.listeners {
                listener.revision_retired(&id, &old.revision);
            }
            self.schedule_retirement(id.clone(), old.revision);
        } else {
            info!(bundle = %id, revision = %revision, size = bundle_size, "Bundle stored");
        }

        Ok(UploadAck {
            application_id: id.application_id,
            variant: id.variant,
            version_code: id.version_code,
            revision: revision.to_string(),
            bundle_sha256: bundle_sha256.to_hex(),
            bundle_size,
            replaced: existing.is_some(),
        })
    }

    async fn write_revision(
        &self,
        record: &BundleRecord,
        bundle: Bytes,
        keystore: Bytes,
        replacing: bool,
    ) -> CatalogResult<()> {
        self.storage
            .write(&record.bundle_key, bundle, WriteMode::CreateOnly)
            .await?;
        self.storage
            .write(&record.keystore_key, keystore, WriteMode::CreateOnly)
            .await?;

        let encoded = serde_json::to_vec(record).map_err(|e| CatalogError::CorruptRecord {
            key: record.id.record_key(),
            message: e.to_string(),
        })?;
        let mode = if replacing {
            WriteMode::Overwrite
        } else {
            WriteMode::CreateOnly
        };

        match self
            .storage
            .write(&record.id.record_key(), Bytes::from(encoded), mode)
            .await
        {
            Ok(()) => Ok(()),
            // Another writer created the record without going through this
            // process's lock.
            Err(StorageError::AlreadyExists(_)) => Err(CatalogError::Conflict(record.id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_revision(&self, id: &BundleId, revision: &Revision) {
        if let Err(e) = self
            .storage
            .delete_prefix(&id.revision_prefix(revision))
            .await
        {
            warn!(bundle = %id, revision = %revision, error = %e, "Failed to discard unfinished revision");
        }
    }

    fn schedule_retirement(&self, id: BundleId, revision: Revision) {
        let storage = self.storage.clone();
        let grace = self.retired_grace;
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            for prefix in [id.revision_prefix(&revision), id.splits_prefix(&revision)] {
                match storage.delete_prefix(&prefix).await {
                    Ok(removed) => {
                        debug!(bundle = %id, prefix = %prefix, removed, "Deleted retired revision objects")
                    }
                    Err(e) => {
                        warn!(bundle = %id, prefix = %prefix, error = %e, "Failed to delete retired revision objects")
                    }
                }
            }
        });
    }

    /// Live record of `id`, if any.
    async fn current(&self, id: &BundleId) -> CatalogResult<Option<Arc<BundleRecord>>> {
        if let Some(record) = self.records.get(id) {
            return Ok(Some(record.clone()));
        }

        let key = id.record_key();
        let bytes = match self.storage.get(&key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: BundleRecord =
            serde_json::from_slice(&bytes).map_err(|e| CatalogError::CorruptRecord {
                key: key.clone(),
                message: e.to_string(),
            })?;
        if record.id != *id {
            return Err(CatalogError::CorruptRecord {
                key,
                message: format!("record belongs to {}", record.id),
            });
        }

        // A concurrent upload may have installed a newer pointer meanwhile.
        let record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| Arc::new(record))
            .clone();
        Ok(Some(record))
    }

    /// Whether `record` is still the live revision of its identity.
    pub fn is_live(&self, record: &BundleRecord) -> bool {
        self.records
            .get(&record.id)
            .is_some_and(|live| live.revision == record.revision)
    }

    /// Fetch the live record of `id`.
    pub async fn fetch(&self, id: &BundleId) -> CatalogResult<Arc<BundleRecord>> {
        self.current(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("bundle {id}")))
    }

    /// Read the bundle bytes of `record`.
    pub async fn load_bundle(&self, record: &BundleRecord) -> CatalogResult<Bytes> {
        self.load_blob(record, &record.bundle_key).await
    }

    /// Stream the bundle bytes of `record` without buffering them.
    pub async fn open_bundle(&self, record: &BundleRecord) -> CatalogResult<ByteStream> {
        match self.storage.get_stream(&record.bundle_key).await {
            Ok(stream) => Ok(stream),
            Err(StorageError::NotFound(_)) => Err(CatalogError::NotFound(format!(
                "blob {} of bundle {} revision {}",
                record.bundle_key, record.id, record.revision
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the keystore bytes of `record`.
    pub async fn load_keystore(&self, record: &BundleRecord) -> CatalogResult<Bytes> {
        self.load_blob(record, &record.keystore_key).await
    }

    async fn load_blob(&self, record: &BundleRecord, key: &str) -> CatalogResult<Bytes> {
        match self.storage.get(key).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::NotFound(_)) => Err(CatalogError::NotFound(format!(
                "blob {key} of bundle {} revision {}",
                record.id, record.revision
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
