//! Prometheus metrics for the Splitstore server.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is served without credentials so Prometheus can
//! scrape it. Metrics carry no bundle identities or device ids, but they do
//! expose aggregate usage. Restrict the endpoint at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("splitstore_uploads_total", "Bundle uploads, by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_upload_bytes_total",
        "Bundle bytes accepted by successful uploads",
    )
    .expect("metric creation failed")
});

pub static DEVICE_REGISTRATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_device_registrations_total",
        "Device specs registered",
    )
    .expect("metric creation failed")
});

pub static DOWNLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "splitstore_downloads_total",
            "Split downloads served, by identification mode and source",
        ),
        &["mode", "source"],
    )
    .expect("metric creation failed")
});

pub static DOWNLOAD_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_download_bytes_total",
        "Archive bytes sent to clients",
    )
    .expect("metric creation failed")
});

pub static SIGNATURE_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splitstore_signature_mismatches_total",
        "Downloads rejected because the claimed fingerprint did not match",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
/// Safe to call multiple times; registration happens once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DEVICE_REGISTRATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOAD_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SIGNATURE_MISMATCHES.clone()))
            .expect("metric registration failed");

        // Split pipeline
        for collector in splitstore_splits::metrics::collectors() {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record an upload outcome.
pub fn record_upload(outcome: &str) {
    UPLOADS.with_label_values(&[outcome]).inc();
}
