//! Bundle upload and record metadata.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use splitstore_catalog::{BundleUpload, CatalogError, UploadAck};
use splitstore_core::{BundleId, BundleSummary, SigningConfig};
use splitstore_signer::Keystore;

/// Parts of an upload request, as received.
#[derive(Default)]
struct UploadForm {
    bundle: Option<Bytes>,
    keystore: Option<Bytes>,
    application_id: Option<String>,
    version: Option<String>,
    variant: Option<String>,
    signing_config: Option<SigningConfig>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> ApiResult<()> {
    if slot.replace(value).is_some() {
        return Err(ApiError::BadRequest(format!("duplicate part: {name}")));
    }
    Ok(())
}

fn required<T>(slot: Option<T>, name: &str) -> ApiResult<T> {
    slot.ok_or_else(|| ApiError::BadRequest(format!("missing part: {name}")))
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(multipart_error)
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "bundle" => {
                    let data = field.bytes().await.map_err(multipart_error)?;
                    set_once(&mut form.bundle, &name, data)?;
                }
                "keystore" => {
                    let data = field.bytes().await.map_err(multipart_error)?;
                    set_once(&mut form.keystore, &name, data)?;
                }
                "application-id" => {
                    let value = field_text(field).await?;
                    set_once(&mut form.application_id, &name, value)?;
                }
                "version" => {
                    let value = field_text(field).await?;
                    set_once(&mut form.version, &name, value)?;
                }
                "variant" => {
                    let value = field_text(field).await?;
                    set_once(&mut form.variant, &name, value)?;
                }
                "signing-config" => {
                    let raw = field.bytes().await.map_err(multipart_error)?;
                    let config: SigningConfig = serde_json::from_slice(&raw)
                        .map_err(|e| ApiError::BadRequest(format!("invalid signing-config: {e}")))?;
                    set_once(&mut form.signing_config, &name, config)?;
                }
                other => {
                    tracing::debug!(part = %other, "Ignoring unknown upload part");
                }
            }
        }

        Ok(form)
    }

    fn into_upload(self) -> ApiResult<BundleUpload> {
        let application_id = required(self.application_id, "application-id")?;
        let variant = required(self.variant, "variant")?;
        let version = BundleId::parse_version(&required(self.version, "version")?)?;
        let id = BundleId::new(application_id.trim(), variant.trim(), version)?;

        Ok(BundleUpload {
            id,
            bundle: required(self.bundle, "bundle")?,
            keystore: required(self.keystore, "keystore")?,
            signing_config: required(self.signing_config, "signing-config")?,
        })
    }
}

/// POST /upload
///
/// Receiving the body is bounded by `server.upload_timeout_secs`. The store
/// step is not cancelled once it starts, so a timeout never leaves a partial
/// record behind.
pub async fn upload_bundle(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadAck>> {
    let timeout = state.config.server.upload_timeout();
    let form = tokio::time::timeout(timeout, UploadForm::read(multipart))
        .await
        .map_err(|_| {
            metrics::record_upload("timeout");
            ApiError::Timeout(format!("upload not received within {}s", timeout.as_secs()))
        })??;
    let upload = form.into_upload()?;
    upload.signing_config.validate()?;

    // Reject keystores that cannot sign now, rather than at first download.
    Keystore::open(&upload.keystore, &upload.signing_config).map_err(|e| {
        metrics::record_upload("rejected");
        ApiError::BadRequest(format!("keystore cannot be opened: {e}"))
    })?;

    let bundle_size = upload.bundle.len() as u64;
    let id = upload.id.clone();
    match state
        .bundles
        .upload(upload, state.config.bundles.override_existing)
        .await
    {
        Ok(ack) => {
            metrics::record_upload(if ack.replaced { "replaced" } else { "created" });
            metrics::UPLOAD_BYTES.inc_by(bundle_size);
            tracing::info!(bundle = %id, revision = %ack.revision, size = bundle_size, "Bundle uploaded");
            Ok(Json(ack))
        }
        Err(CatalogError::Conflict(msg)) => {
            metrics::record_upload("conflict");
            Err(ApiError::Conflict(msg))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /bundles/{application_id}/{variant}/{version}
///
/// Record metadata without signing secrets.
pub async fn get_bundle(
    State(state): State<AppState>,
    Path((application_id, variant, version)): Path<(String, String, String)>,
) -> ApiResult<Json<BundleSummary>> {
    let id = BundleId::new(application_id, variant, BundleId::parse_version(&version)?)?;
    let record = state.bundles.fetch(&id).await?;
    Ok(Json(record.summary()))
}
