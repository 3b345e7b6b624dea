//! Device registration.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use splitstore_core::DeviceSpec;

/// POST /register
///
/// Returns the new device id as plain text.
pub async fn register_device(
    State(state): State<AppState>,
    body: Result<Json<DeviceSpec>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(spec) =
        body.map_err(|e| ApiError::BadRequest(format!("invalid device spec: {}", e.body_text())))?;
    let device_id = state.devices.register(spec.normalized()).await?;
    metrics::DEVICE_REGISTRATIONS.inc();
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], device_id.to_string()))
}
