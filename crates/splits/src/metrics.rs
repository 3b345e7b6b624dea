//! Prometheus metrics for split resolution.
//!
//! Registered into the server's registry at startup.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};
use std::sync::LazyLock;

pub static CACHE_HITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "splitstore_split_cache_hits_total",
            "Split sets served from cache, by tier",
        ),
        &["tier"],
    )
    .expect("metric creation failed")
});

pub static SINGLEFLIGHT_JOINS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_singleflight_joins_total",
        "Requests that joined an in-flight generation",
    )
    .expect("metric creation failed")
});

pub static ENGINE_INVOCATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_engine_invocations_total",
        "Split generation engine invocations",
    )
    .expect("metric creation failed")
});

pub static GENERATION_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_generation_failures_total",
        "Split generations that failed",
    )
    .expect("metric creation failed")
});

pub static GENERATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "splitstore_generation_duration_seconds",
            "Time to generate and sign a split set",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

/// Every collector defined here, for registration.
pub fn collectors() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CACHE_HITS.clone()),
        Box::new(SINGLEFLIGHT_JOINS.clone()),
        Box::new(ENGINE_INVOCATIONS.clone()),
        Box::new(GENERATION_FAILURES.clone()),
        Box::new(GENERATION_DURATION.clone()),
    ]
}
