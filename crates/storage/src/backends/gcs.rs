//! Google Cloud Storage backend using the `object_store` crate.

use crate::error::{StorageError, StorageResult};
use crate::retry::{create_with_retry, timeout_error, with_retry};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as _, PutMode, PutOptions, PutPayload};
use splitstore_core::config::RetryConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Google Cloud Storage object store.
///
/// Single-object uploads are atomic; create-only writes use a
/// generation precondition through `PutMode::Create`.
pub struct GcsBackend {
    store: Arc<dyn object_store::ObjectStore>,
    bucket: String,
    prefix: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBackend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Map `object_store` errors onto storage errors for `key`.
fn map_error(err: object_store::Error, key: &str) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists(key.to_string()),
        other => StorageError::Gcs(other),
    }
}

impl GcsBackend {
    /// Create a new GCS backend.
    ///
    /// Without a service account path the builder falls back to the
    /// `GOOGLE_*` environment and application default credentials.
    pub fn new(
        bucket: &str,
        prefix: Option<String>,
        service_account_path: Option<PathBuf>,
        retry: RetryConfig,
    ) -> StorageResult<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &service_account_path {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("failed to create GCS client: {e}")))?;

        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        debug!(bucket, prefix = ?prefix, "GcsBackend initialised");

        Ok(Self::with_store(Arc::new(store), bucket, prefix, retry))
    }

    /// Wrap an already constructed `object_store` client.
    pub fn with_store(
        store: Arc<dyn object_store::ObjectStore>,
        bucket: &str,
        prefix: Option<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            prefix,
            retry,
        }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        match &self.prefix {
            Some(prefix) => ObjectPath::from(format!("{prefix}/{key}")),
            None => ObjectPath::from(key),
        }
    }

    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(&format!("{prefix}/"))
                .unwrap_or(full_key)
                .to_string(),
            None => full_key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsBackend {
    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = &self.full_path(key);
        let store = &self.store;
        let meta = with_retry(&self.retry, "head", key, move || async move {
            store.head(path).await.map_err(|e| map_error(e, key))
        })
        .await?;

        Ok(ObjectMeta {
            size: meta.size,
            last_modified: time::OffsetDateTime::from_unix_timestamp(meta.last_modified.timestamp())
                .ok(),
        })
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = &self.full_path(key);
        let store = &self.store;
        with_retry(&self.retry, "get", key, move || async move {
            let result = store.get(path).await.map_err(|e| map_error(e, key))?;
            result.bytes().await.map_err(|e| map_error(e, key))
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = &self.full_path(key);
        let store = &self.store;
        let result = with_retry(&self.retry, "get_stream", key, move || async move {
            store.get(path).await.map_err(|e| map_error(e, key))
        })
        .await?;

        let owned_key = key.to_string();
        let stream = result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| map_error(e, &owned_key)));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "gcs", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = &self.full_path(key);
        let store = &self.store;
        with_retry(&self.retry, "put", key, move || {
            let payload = PutPayload::from(data.clone());
            async move {
                store
                    .put(path, payload)
                    .await
                    .map_err(|e| map_error(e, key))?;
                Ok(())
            }
        })
        .await
    }

    #[instrument(skip(self, data), fields(backend = "gcs", size = data.len()))]
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        let path = &self.full_path(key);
        let store = &self.store;
        let expected = data.clone();
        let matches_stored = || async move { self.get(key).await.map(|stored| stored == expected) };
        let write = move || {
            let payload = PutPayload::from(data.clone());
            async move {
                let opts = PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                };
                match store.put_opts(path, payload, opts).await {
                    Ok(_) => Ok(true),
                    Err(object_store::Error::AlreadyExists { .. })
                    | Err(object_store::Error::Precondition { .. }) => Ok(false),
                    Err(e) => Err(map_error(e, key)),
                }
            }
        };
        create_with_retry(&self.retry, key, write, matches_stored).await
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = &self.full_path(key);
        let store = &self.store;
        with_retry(&self.retry, "delete", key, move || async move {
            store.delete(path).await.map_err(|e| map_error(e, key))
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = &self.full_path(prefix.trim_end_matches('/'));
        let store = &self.store;
        let mut keys: Vec<String> = with_retry(&self.retry, "list", prefix, move || async move {
            store
                .list(Some(full_prefix))
                .map_ok(|meta| meta.location.to_string())
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| map_error(e, prefix))
        })
        .await?;

        keys = keys.iter().map(|k| self.strip_prefix(k)).collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "gcs"
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn health_check(&self) -> StorageResult<()> {
        let marker_key = ".splitstore-health-check";

        let check = async {
            self.put(marker_key, Bytes::from_static(b"health-check"))
                .await?;
            match self.delete(marker_key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| timeout_error("health_check", marker_key))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::WriteMode;
    use object_store::memory::InMemory;

    fn backend(prefix: Option<&str>) -> GcsBackend {
        GcsBackend::with_store(
            Arc::new(InMemory::new()),
            "test-bucket",
            prefix.map(str::to_string),
            RetryConfig::no_retry(),
        )
    }

    #[tokio::test]
    async fn test_roundtrip_with_prefix() {
        let backend = backend(Some("splitstore"));
        backend
            .put("bundles/a/record.json", Bytes::from("{}"))
            .await
            .unwrap();

        assert!(backend.exists("bundles/a/record.json").await.unwrap());
        assert_eq!(
            backend.get("bundles/a/record.json").await.unwrap(),
            Bytes::from("{}")
        );
        assert_eq!(
            backend.list("bundles").await.unwrap(),
            vec!["bundles/a/record.json"]
        );
    }

    #[tokio::test]
    async fn test_create_only_collision() {
        let backend = backend(None);
        backend
            .write("devices/x.json", Bytes::from("1"), WriteMode::CreateOnly)
            .await
            .unwrap();
        let err = backend
            .write("devices/x.json", Bytes::from("2"), WriteMode::CreateOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(
            backend.get("devices/x.json").await.unwrap(),
            Bytes::from("1")
        );
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let backend = backend(None);
        assert!(matches!(
            backend.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!backend.exists("nope").await.unwrap());
    }
}
