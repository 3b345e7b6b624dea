//! Two-tier split cache.
//!
//! The memory tier is an LRU of finished split sets. The persisted tier keeps
//! each set's archive at
//! `splits/{app}/{variant}/{version}/{revision}/{cache_key}.tar`, so a restart
//! does not force regeneration.

use crate::archive;
use crate::error::SplitResult;
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use splitstore_catalog::RevisionListener;
use splitstore_core::config::CacheConfig;
use splitstore_core::{BundleId, CacheKey, Revision, SplitSet};
use splitstore_storage::{ObjectStore, StorageError, WriteMode};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

/// A finished split set with its archive bytes.
#[derive(Debug)]
pub struct CachedSplits {
    pub key: CacheKey,
    pub id: BundleId,
    pub revision: Revision,
    pub set: SplitSet,
    /// Deterministic archive of `set`, served as the download body.
    pub archive: Bytes,
}

impl CachedSplits {
    pub fn new(key: CacheKey, id: BundleId, revision: Revision, set: SplitSet) -> SplitResult<Self> {
        let archive = archive::pack_split_set(&set)?;
        Ok(Self {
            key,
            id,
            revision,
            set,
            archive,
        })
    }
}

pub struct SplitCache {
    memory: Mutex<LruCache<CacheKey, Arc<CachedSplits>>>,
    /// Certificate fingerprints of live revisions.
    fingerprints: DashMap<(BundleId, Revision), String>,
    storage: Arc<dyn ObjectStore>,
    persist: bool,
}

fn persisted_key(id: &BundleId, revision: &Revision, key: &CacheKey) -> String {
    format!("{}/{}.tar", id.splits_prefix(revision), key.to_hex())
}

impl SplitCache {
    pub fn new(storage: Arc<dyn ObjectStore>, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            memory: Mutex::new(LruCache::new(capacity)),
            fingerprints: DashMap::new(),
            storage,
            persist: config.persist,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedSplits>> {
        self.memory.lock().get(key).cloned()
    }

    pub fn insert(&self, splits: Arc<CachedSplits>) {
        self.memory.lock().put(splits.key, splits);
    }

    pub fn len(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every memory entry derived from `revision` of `id`.
    pub fn evict_revision(&self, id: &BundleId, revision: &Revision) -> usize {
        let mut memory = self.memory.lock();
        let stale: Vec<CacheKey> = memory
            .iter()
            .filter(|(_, v)| v.id == *id && v.revision == *revision)
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            memory.pop(key);
        }
        stale.len()
    }

    pub fn fingerprint(&self, id: &BundleId, revision: &Revision) -> Option<String> {
        self.fingerprints
            .get(&(id.clone(), *revision))
            .map(|entry| entry.value().clone())
    }

    pub fn insert_fingerprint(&self, id: &BundleId, revision: &Revision, fingerprint: String) {
        self.fingerprints.insert((id.clone(), *revision), fingerprint);
    }

    /// Look up the persisted tier. Unreadable archives count as misses.
    pub async fn load_persisted(
        &self,
        id: &BundleId,
        revision: &Revision,
        key: &CacheKey,
    ) -> SplitResult<Option<Arc<CachedSplits>>> {
        if !self.persist {
            return Ok(None);
        }

        let object_key = persisted_key(id, revision, key);
        let archive = match self.storage.get(&object_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match archive::unpack_split_set(&archive) {
            Ok(set) => Ok(Some(Arc::new(CachedSplits {
                key: *key,
                id: id.clone(),
                revision: *revision,
                set,
                archive,
            }))),
            Err(e) => {
                warn!(key = %object_key, error = %e, "Ignoring unreadable persisted split archive");
                Ok(None)
            }
        }
    }

    /// Write a finished set to the persisted tier.
    ///
    /// Archives are deterministic, so an existing object already holds the
    /// same bytes.
    pub async fn store_persisted(&self, splits: &CachedSplits) -> SplitResult<()> {
        if !self.persist {
            return Ok(());
        }

        let object_key = persisted_key(&splits.id, &splits.revision, &splits.key);
        match self
            .storage
            .write(&object_key, splits.archive.clone(), WriteMode::CreateOnly)
            .await
        {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {
                debug!(key = %object_key, size = splits.archive.len(), "Persisted split archive");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a set from the persisted tier. A missing object is not an error.
    pub async fn remove_persisted(&self, splits: &CachedSplits) -> SplitResult<()> {
        let object_key = persisted_key(&splits.id, &splits.revision, &splits.key);
        match self.storage.delete(&object_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl RevisionListener for SplitCache {
    fn revision_retired(&self, id: &BundleId, retired: &Revision) {
        self.fingerprints.remove(&(id.clone(), *retired));
        let evicted = self.evict_revision(id, retired);
        debug!(bundle = %id, revision = %retired, evicted, "Evicted retired split sets");
    }
}
