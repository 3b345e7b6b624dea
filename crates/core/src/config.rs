//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: the endpoint is not behind basic auth, restrict it at the
    /// network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum accepted size of an upload request body in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Upper bound on the time spent receiving an upload, in seconds.
    /// An upload that exceeds it is aborted before any record is written.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

fn default_upload_timeout_secs() -> u64 {
    1800 // 30 minutes
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the upload timeout as a Duration.
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_bytes == 0 {
            return Err("server.max_upload_bytes must be greater than 0".to_string());
        }
        if usize::try_from(self.max_upload_bytes).is_err() {
            return Err(format!(
                "server.max_upload_bytes {} does not fit in memory on this platform",
                self.max_upload_bytes
            ));
        }
        if self.upload_timeout_secs == 0 {
            return Err("server.upload_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Retry policy for cloud storage adapters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every following attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("storage.retry.max_attempts must be at least 1".to_string());
        }
        if self.max_attempts > 20 {
            return Err(format!(
                "storage.retry.max_attempts {} is unreasonably large (max 20)",
                self.max_attempts
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Retry policy for transient errors.
        #[serde(default)]
        retry: RetryConfig,
    },
    /// Google Cloud Storage.
    Gcs {
        /// Bucket name.
        bucket: String,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Path to a service account JSON key. Falls back to application
        /// default credentials when unset.
        service_account_path: Option<PathBuf>,
        /// Retry policy for transient errors.
        #[serde(default)]
        retry: RetryConfig,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Short name of the configured backend.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Filesystem { .. } => "filesystem",
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::Gcs { .. } => "gcs",
        }
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("storage.path must not be empty".to_string());
                }
                Ok(())
            }
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                retry,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("storage.bucket must not be empty".to_string());
                }
                retry.validate()?;
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Gcs { bucket, retry, .. } => {
                if bucket.is_empty() {
                    return Err("storage.bucket must not be empty".to_string());
                }
                retry.validate()
            }
        }
    }
}

/// HTTP Basic authentication credentials.
///
/// Authentication is disabled when neither field is set.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    /// WARNING: Prefer SPLITSTORE_AUTH__PASSWORD over storing in config.
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AuthConfig {
    /// Whether requests must carry credentials.
    pub fn enabled(&self) -> bool {
        self.username.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (None, None) => Ok(()),
            (Some(""), _) => Err("auth.username must not be empty".to_string()),
            (Some(_), Some(_)) => Ok(()),
            _ => Err("auth requires both username and password when either is set".to_string()),
        }
    }
}

/// Bundle lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundlesConfig {
    /// Allow a re-upload to replace an existing record (default: false).
    #[serde(default)]
    pub override_existing: bool,
    /// Seconds to keep a replaced revision's blobs before deleting them.
    /// Downloads that resolved the old record keep reading them meanwhile.
    #[serde(default = "default_retired_revision_grace_secs")]
    pub retired_revision_grace_secs: u64,
}

fn default_retired_revision_grace_secs() -> u64 {
    300 // 5 minutes
}

impl Default for BundlesConfig {
    fn default() -> Self {
        Self {
            override_existing: false,
            retired_revision_grace_secs: default_retired_revision_grace_secs(),
        }
    }
}

impl BundlesConfig {
    pub fn retired_revision_grace(&self) -> Duration {
        Duration::from_secs(self.retired_revision_grace_secs)
    }
}

/// Download behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Compare the claimed certificate fingerprint in signature mode (default: true).
    #[serde(default = "default_validate_signature")]
    pub validate_signature: bool,
    /// Delay applied before every chunk when the request does not set one.
    #[serde(default)]
    pub default_throttle_ms: u64,
    /// Cap on per-request throttle values.
    #[serde(default = "default_max_throttle_ms")]
    pub max_throttle_ms: u64,
    /// Size of a paced chunk.
    #[serde(default = "default_throttle_chunk_bytes")]
    pub throttle_chunk_bytes: usize,
}

fn default_validate_signature() -> bool {
    true
}

fn default_max_throttle_ms() -> u64 {
    10_000
}

fn default_throttle_chunk_bytes() -> usize {
    64 * 1024
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            validate_signature: default_validate_signature(),
            default_throttle_ms: 0,
            max_throttle_ms: default_max_throttle_ms(),
            throttle_chunk_bytes: default_throttle_chunk_bytes(),
        }
    }
}

impl DownloadConfig {
    /// Effective delay for a request, capped at `max_throttle_ms`.
    pub fn effective_throttle(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_throttle_ms)
            .min(self.max_throttle_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.throttle_chunk_bytes == 0 {
            return Err("download.throttle_chunk_bytes must be greater than 0".to_string());
        }
        if self.default_throttle_ms > self.max_throttle_ms {
            return Err(format!(
                "download.default_throttle_ms {} exceeds download.max_throttle_ms {}",
                self.default_throttle_ms, self.max_throttle_ms
            ));
        }
        Ok(())
    }
}

/// Split cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of split sets kept in memory.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Persist generated split sets to the storage backend (default: true).
    #[serde(default = "default_cache_persist")]
    pub persist: bool,
}

fn default_cache_max_entries() -> usize {
    256
}

fn default_cache_persist() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            persist: default_cache_persist(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("cache.max_entries must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Split generation engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    /// Built-in engine for tar-packaged module layouts.
    #[default]
    Builtin,
    /// External program invoked once per generation.
    Command {
        /// Program to execute.
        program: PathBuf,
        /// Extra arguments passed before the generated ones.
        #[serde(default)]
        args: Vec<String>,
        /// Kill the program after this many seconds.
        #[serde(default = "default_engine_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_engine_timeout_secs() -> u64 {
    300 // 5 minutes
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            EngineConfig::Builtin => Ok(()),
            EngineConfig::Command {
                program,
                timeout_secs,
                ..
            } => {
                if program.as_os_str().is_empty() {
                    return Err("engine.program must not be empty".to_string());
                }
                if *timeout_secs == 0 {
                    return Err("engine.timeout_secs must be greater than 0".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub bundles: BundlesConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage under `./data`, no auth
    /// and the built-in engine.
    pub fn for_testing() -> Self {
        Self {
            bundles: BundlesConfig {
                override_existing: false,
                retired_revision_grace_secs: 0,
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.auth.validate()?;
        self.download.validate()?;
        self.cache.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}
