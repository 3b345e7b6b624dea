//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.server.max_upload_bytes).unwrap_or(usize::MAX);

    let mut router = Router::new()
        // Health check, served without credentials for load balancers
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/upload",
            post(handlers::upload_bundle).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/register", post(handlers::register_device))
        .route(
            "/download",
            get(handlers::download_splits).post(handlers::download_splits),
        )
        .route(
            "/bundles/{application_id}/{variant}/{version}",
            get(handlers::get_bundle),
        );

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
