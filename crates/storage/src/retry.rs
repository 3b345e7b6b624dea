//! Bounded exponential backoff for cloud storage calls.

use crate::error::{StorageError, StorageResult};
use splitstore_core::config::RetryConfig;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &'static str,
    key: &str,
    mut op: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    key,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient storage error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`with_retry`] for create-only writes.
///
/// A write that timed out may still have landed, so a conflict seen on a
/// later attempt can be our own object. In that case `matches_stored` decides
/// whether the stored object is the payload, which counts as created.
pub async fn create_with_retry<F, Fut, M, MFut>(
    policy: &RetryConfig,
    key: &str,
    mut op: F,
    matches_stored: M,
) -> StorageResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<bool>>,
    M: FnOnce() -> MFut,
    MFut: Future<Output = StorageResult<bool>>,
{
    let attempts = AtomicU32::new(0);
    let created = with_retry(policy, "put_if_not_exists", key, || {
        attempts.fetch_add(1, Ordering::Relaxed);
        op()
    })
    .await?;
    if created || attempts.load(Ordering::Relaxed) == 1 {
        return Ok(created);
    }

    let ours = matches_stored().await?;
    debug!(key, ours, "Create-only write conflicted after a retry");
    Ok(ours)
}

/// Wrap an elapsed timeout as a retryable storage error.
pub fn timeout_error(operation: &str, key: &str) -> StorageError {
    StorageError::Timeout(format!("{operation} {key}"))
}
