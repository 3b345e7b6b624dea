//! HTTP API server for Splitstore.
//!
//! This crate provides the HTTP surface:
//! - Bundle uploads and record metadata
//! - Device registration
//! - Signed split downloads, optionally throttled
//! - Health and Prometheus metrics

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod throttle;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
