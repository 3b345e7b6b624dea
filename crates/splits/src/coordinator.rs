//! Split resolution with singleflight generation.
//!
//! Identical requests (same [`CacheKey`]) share one generation task. The
//! task is spawned detached from any caller, so a disconnecting client never
//! cancels work other waiters need; the result is cached either way.

use crate::cache::{CachedSplits, SplitCache};
use crate::engine::{BundleSource, SplitEngine};
use crate::error::{SplitError, SplitResult};
use crate::metrics;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use splitstore_catalog::BundleStore;
use splitstore_core::{BundleId, BundleRecord, CacheKey, SplitRequest, SplitSet};
use splitstore_signer::ApkSigner;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

type Generation = Shared<BoxFuture<'static, SplitResult<Generated>>>;

/// Where a resolved split set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveSource {
    Memory,
    Persisted,
    Generated,
    /// Attached to a generation started by another request.
    Joined,
}

impl ResolveSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Persisted => "persisted",
            Self::Generated => "generated",
            Self::Joined => "joined",
        }
    }
}

/// A resolved split set.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub splits: Arc<CachedSplits>,
    pub source: ResolveSource,
}

#[derive(Clone)]
struct Generated {
    splits: Arc<CachedSplits>,
    source: ResolveSource,
}

struct Inner {
    bundles: Arc<BundleStore>,
    cache: Arc<SplitCache>,
    engine: Arc<dyn SplitEngine>,
    signer: Arc<dyn ApkSigner>,
    in_flight: Mutex<HashMap<CacheKey, Generation>>,
}

/// Removes the in-flight entry when the generation task ends, even by panic.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

/// Resolves split sets: cache lookup, or generate, sign and publish.
#[derive(Clone)]
pub struct SplitCoordinator {
    inner: Arc<Inner>,
}

impl SplitCoordinator {
    pub fn new(
        bundles: Arc<BundleStore>,
        cache: Arc<SplitCache>,
        engine: Arc<dyn SplitEngine>,
        signer: Arc<dyn ApkSigner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bundles,
                cache,
                engine,
                signer,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn bundles(&self) -> &Arc<BundleStore> {
        &self.inner.bundles
    }

    /// Number of generations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Resolve the split set for `request` against the live record of `id`.
    pub async fn resolve_splits(&self, id: &BundleId, request: SplitRequest) -> SplitResult<Resolved> {
        let record = self.inner.bundles.fetch(id).await?;
        self.resolve_record(record, request).await
    }

    /// Resolve against an already fetched record.
    pub async fn resolve_record(
        &self,
        record: Arc<BundleRecord>,
        request: SplitRequest,
    ) -> SplitResult<Resolved> {
        request
            .validate()
            .map_err(|e| SplitError::Validation(e.to_string()))?;

        let key = CacheKey::compute(&record.id, &record.revision, &request);
        if let Some(splits) = self.inner.cache.get(&key) {
            metrics::CACHE_HITS.with_label_values(&["memory"]).inc();
            return Ok(Resolved {
                splits,
                source: ResolveSource::Memory,
            });
        }

        let (generation, joined) = {
            let mut in_flight = self.inner.in_flight.lock();
            // The leader publishes before it leaves the table, so a miss above
            // followed by an empty slot here means the entry was just published.
            if let Some(splits) = self.inner.cache.get(&key) {
                metrics::CACHE_HITS.with_label_values(&["memory"]).inc();
                return Ok(Resolved {
                    splits,
                    source: ResolveSource::Memory,
                });
            }
            match in_flight.get(&key) {
                Some(generation) => (generation.clone(), true),
                None => {
                    let generation = self.spawn_generation(key, record, request);
                    in_flight.insert(key, generation.clone());
                    (generation, false)
                }
            }
        };

        if joined {
            metrics::SINGLEFLIGHT_JOINS.inc();
            debug!(cache_key = %key, "Joined in-flight generation");
        }

        let generated = generation.await?;
        Ok(Resolved {
            splits: generated.splits,
            source: if joined {
                ResolveSource::Joined
            } else {
                generated.source
            },
        })
    }

    fn spawn_generation(
        &self,
        key: CacheKey,
        record: Arc<BundleRecord>,
        request: SplitRequest,
    ) -> Generation {
        let inner = self.inner.clone();
        let span = info_span!("generate_splits", bundle = %record.id, cache_key = %key);

        let task = tokio::spawn(
            async move {
                let guard = InFlightGuard {
                    inner: inner.clone(),
                    key,
                };
                let result = inner.generate(key, &record, &request).await;
                match &result {
                    Ok(generated) => inner.cache.insert(generated.splits.clone()),
                    Err(e) => {
                        metrics::GENERATION_FAILURES.inc();
                        warn!(error = %e, "Split generation failed");
                    }
                }
                drop(guard);
                result
            }
            .instrument(span),
        );

        async move {
            task.await
                .unwrap_or_else(|e| Err(SplitError::Generation(format!("generation task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Certificate fingerprint of the keystore behind `record`.
    pub async fn certificate_fingerprint(&self, record: &BundleRecord) -> SplitResult<String> {
        let cache = &self.inner.cache;
        if let Some(fingerprint) = cache.fingerprint(&record.id, &record.revision) {
            return Ok(fingerprint);
        }

        let keystore = self.inner.bundles.load_keystore(record).await?;
        let fingerprint = self
            .inner
            .signer
            .certificate_fingerprint(&keystore, &record.signing_config)?;
        // A retired revision would never be evicted again.
        if self.inner.bundles.is_live(record) {
            cache.insert_fingerprint(&record.id, &record.revision, fingerprint.clone());
        }
        Ok(fingerprint)
    }
}

impl Inner {
    async fn generate(
        &self,
        key: CacheKey,
        record: &BundleRecord,
        request: &SplitRequest,
    ) -> SplitResult<Generated> {
        match self
            .cache
            .load_persisted(&record.id, &record.revision, &key)
            .await
        {
            Ok(Some(splits)) => {
                metrics::CACHE_HITS.with_label_values(&["persisted"]).inc();
                debug!("Loaded split set from persisted tier");
                return Ok(Generated {
                    splits,
                    source: ResolveSource::Persisted,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Persisted split lookup failed, regenerating"),
        }

        let started = Instant::now();
        let bundle = BundleSource::from_stream(
            self.bundles.open_bundle(record).await?,
            usize::try_from(record.bundle_size).unwrap_or(0),
        );
        let keystore = self.bundles.load_keystore(record).await?;

        metrics::ENGINE_INVOCATIONS.inc();
        let apks = self.engine.generate(bundle, request).await?;
        if apks.is_empty() {
            return Err(SplitError::Generation(format!(
                "{} engine produced no splits",
                self.engine.name()
            )));
        }

        let signer = self.signer.clone();
        let signing_config = record.signing_config.clone();
        let signed = tokio::task::spawn_blocking(move || {
            signer.sign_splits(&apks, &keystore, &signing_config)
        })
        .await
        .map_err(|e| SplitError::Signing(format!("signing task failed: {e}")))??;

        let set = SplitSet::new(signed).map_err(|e| SplitError::Generation(e.to_string()))?;
        let splits = Arc::new(CachedSplits::new(
            key,
            record.id.clone(),
            record.revision,
            set,
        )?);

        if self.bundles.is_live(record) {
            if let Err(e) = self.cache.store_persisted(&splits).await {
                warn!(error = %e, "Failed to persist split archive");
            } else if !self.bundles.is_live(record) {
                // Retired while writing; the prefix delete may already have run.
                if let Err(e) = self.cache.remove_persisted(&splits).await {
                    warn!(error = %e, "Failed to remove split archive of retired revision");
                }
            }
        } else {
            debug!(bundle = %record.id, "Revision retired during generation, not persisting");
        }

        let elapsed = started.elapsed();
        metrics::GENERATION_DURATION.observe(elapsed.as_secs_f64());
        info!(
            engine = self.engine.name(),
            splits = splits.set.len(),
            bytes = splits.archive.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Generated split set"
        );

        Ok(Generated {
            splits,
            source: ResolveSource::Generated,
        })
    }
}
