//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::retry::{create_with_retry, timeout_error, with_retry};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use splitstore_core::config::RetryConfig;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Upper bound on a single health check round trip.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker included in lazy-credentials errors so they surface as
/// configuration errors instead of transport failures.
const CREDENTIALS_ERROR_MARKER: &str = "splitstore-s3-lazy-credentials";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// Keeps backend construction free of TLS/native-root initialization.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|e| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_ERROR_MARKER}: failed to initialize credential chain: {e}"
                    ))
                })
            })
            .await?;

        chain.provide_credentials().await.map_err(|e| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_ERROR_MARKER}: credentials resolution failed: {e}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    match err {
        SdkError::ServiceError(service_err) => Some(service_err.raw().status().as_u16()),
        _ => None,
    }
}

/// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if status_of(&err) == Some(404) {
        return StorageError::NotFound(key.to_string());
    }
    if err.to_string().contains(CREDENTIALS_ERROR_MARKER) {
        return StorageError::Config(
            "S3 credential initialization failed. Configure credentials explicitly or ensure ambient AWS credentials are available."
                .to_string(),
        );
    }
    if let Some(status) = status_of(&err)
        && (400..500).contains(&status)
        && status != 408
        && status != 429
    {
        return StorageError::Config(format!("S3 rejected request for {key} with {status}"));
    }
    StorageError::S3(Box::new(err))
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects `endpoint/bucket/key` URLs, required for
    /// MinIO and some S3-compatible services.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
        retry: RetryConfig,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "splitstore-config");
            builder = builder.credentials_provider(credentials);
        } else {
            builder = builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region));
        }

        if let Some(endpoint_url) = endpoint.map(normalize_endpoint) {
            // Plain-HTTP endpoints (local MinIO) must not depend on native trust roots.
            if endpoint_url.starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
            builder = builder.endpoint_url(endpoint_url);
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            retry,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
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

/// Bare `host:port` endpoints get an `http://` scheme.
fn normalize_endpoint(endpoint: String) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint
    } else {
        format!("http://{endpoint}")
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        let output = with_retry(&self.retry, "head", key, move || async move {
            client
                .head_object()
                .bucket(bucket)
                .key(full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))
        })
        .await?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok());

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        with_retry(&self.retry, "get", key, move || async move {
            let output = client
                .get_object()
                .bucket(bucket)
                .key(full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            let collected = output
                .body
                .collect()
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;
            Ok(collected.into_bytes())
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use futures::StreamExt;

        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        let output = with_retry(&self.retry, "get_stream", key, move || async move {
            client
                .get_object()
                .bucket(bucket)
                .key(full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))
        })
        .await?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        with_retry(&self.retry, "put", key, move || {
            let data = data.clone();
            async move {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(full_key)
                    .body(data.into())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;
                Ok(())
            }
        })
        .await
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        let payload = data.clone();
        let matches_stored = || async move { self.get(key).await.map(|stored| stored == payload) };
        let write = move || {
            let data = data.clone();
            async move {
                let result = client
                    .put_object()
                    .bucket(bucket)
                    .key(full_key)
                    .if_none_match("*")
                    .body(data.into())
                    .send()
                    .await;
                match result {
                    Ok(_) => Ok(true),
                    // 412 when the object exists, 409 when a concurrent
                    // conditional write is in flight.
                    Err(e) if matches!(status_of(&e), Some(409) | Some(412)) => Ok(false),
                    Err(e) => Err(map_sdk_error(e, key)),
                }
            }
        };
        create_with_retry(&self.retry, key, write, matches_stored).await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // S3 deletes are idempotent; check first so missing keys report NotFound.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let full_key = self.full_key(key);
        let (client, bucket, full_key) = (&self.client, &self.bucket, full_key.as_str());
        with_retry(&self.retry, "delete", key, move || async move {
            client
                .delete_object()
                .bucket(bucket)
                .key(full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let (client, bucket, full_prefix) = (&self.client, &self.bucket, full_prefix.as_str());
            let token = continuation_token.take();
            let output = with_retry(&self.retry, "list", prefix, move || {
                let token = token.clone();
                async move {
                    client
                        .list_objects_v2()
                        .bucket(bucket)
                        .prefix(full_prefix)
                        .set_continuation_token(token)
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(e, prefix))
                }
            })
            .await?;

            results.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| self.strip_prefix(k)),
            );

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        results.sort();
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
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
