//! Object storage abstraction and backends for Splitstore.
//!
//! This crate provides:
//! - An `ObjectStore` trait with atomic create-only and overwrite writes
//! - Backends: local filesystem, S3-compatible, and Google Cloud Storage
//! - Bounded exponential backoff for transient cloud errors

pub mod backends;
pub mod error;
pub mod retry;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, gcs::GcsBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, WriteMode};

use splitstore_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            retry,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
                retry.clone(),
            )
            .await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Gcs {
            bucket,
            prefix,
            service_account_path,
            retry,
        } => {
            let backend = GcsBackend::new(
                bucket,
                prefix.clone(),
                service_account_path.clone(),
                retry.clone(),
            )?;
            Ok(Arc::new(backend))
        }
    }
}
