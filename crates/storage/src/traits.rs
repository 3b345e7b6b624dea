//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// How a write treats an existing object at the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the key is present.
    CreateOnly,
    /// Atomically replace any existing object.
    Overwrite,
}

/// Keyed byte storage shared by bundles, registrations and split archives.
///
/// Every implementation guarantees that readers never observe a partially
/// written object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Put an object only if it doesn't exist.
    ///
    /// Returns `false` without touching the stored object when the key is
    /// already present. Retrying backends treat a conflict after a transient
    /// failure as their own write when the stored bytes equal `data`.
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Get the name of this storage backend, used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Write an object with explicit collision semantics.
    async fn write(&self, key: &str, data: Bytes, mode: WriteMode) -> StorageResult<()> {
        match mode {
            WriteMode::Overwrite => self.put(key, data).await,
            WriteMode::CreateOnly => {
                if self.put_if_not_exists(key, data).await? {
                    Ok(())
                } else {
                    Err(StorageError::AlreadyExists(key.to_string()))
                }
            }
        }
    }

    /// Delete every object under a prefix, returning how many were removed.
    ///
    /// Objects that vanish concurrently are not an error.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut removed = 0;
        for key in self.list(prefix).await? {
            match self.delete(&key).await {
                Ok(()) => removed += 1,
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}
