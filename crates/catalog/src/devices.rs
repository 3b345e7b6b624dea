//! Device registrations.

use crate::error::{CatalogError, CatalogResult};
use bytes::Bytes;
use dashmap::DashMap;
use splitstore_core::{DeviceId, DeviceRegistration, DeviceSpec};
use splitstore_storage::{ObjectStore, StorageError, WriteMode};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Fresh ids colliding with an existing registration are regenerated this
/// many times before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

/// Issues device ids and resolves them back to device specs.
///
/// Registrations are immutable once written, so resolved specs are memoized.
pub struct DeviceRegistry {
    storage: Arc<dyn ObjectStore>,
    resolved: DashMap<DeviceId, Arc<DeviceSpec>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            resolved: DashMap::new(),
        }
    }

    /// Validate and persist `spec` under a newly minted device id.
    pub async fn register(&self, spec: DeviceSpec) -> CatalogResult<DeviceId> {
        spec.validate()?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let registration = DeviceRegistration {
                device_id: DeviceId::new(),
                device_spec: spec.clone(),
                created_at: OffsetDateTime::now_utc(),
            };
            let key = registration.device_id.storage_key();
            let encoded =
                serde_json::to_vec(&registration).map_err(|e| CatalogError::CorruptRecord {
                    key: key.clone(),
                    message: e.to_string(),
                })?;

            match self
                .storage
                .write(&key, Bytes::from(encoded), WriteMode::CreateOnly)
                .await
            {
                Ok(()) => {
                    let id = registration.device_id;
                    self.resolved.insert(id, Arc::new(registration.device_spec));
                    info!(device_id = %id, "Device registered");
                    return Ok(id);
                }
                Err(StorageError::AlreadyExists(_)) => {
                    warn!(key = %key, "Device id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CatalogError::Conflict(
            "could not allocate a unique device id".to_string(),
        ))
    }

    /// Look up the spec registered under `id`.
    pub async fn resolve(&self, id: &DeviceId) -> CatalogResult<Arc<DeviceSpec>> {
        if let Some(spec) = self.resolved.get(id) {
            return Ok(spec.clone());
        }

        let key = id.storage_key();
        let bytes = match self.storage.get(&key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(CatalogError::NotFound(format!("device {id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let registration: DeviceRegistration =
            serde_json::from_slice(&bytes).map_err(|e| CatalogError::CorruptRecord {
                key: key.clone(),
                message: e.to_string(),
            })?;

        debug!(device_id = %id, "Device registration loaded");
        let spec = Arc::new(registration.device_spec);
        self.resolved.insert(*id, spec.clone());
        Ok(spec)
    }
}
