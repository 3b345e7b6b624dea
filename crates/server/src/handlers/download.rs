//! Split downloads.
//!
//! A download names the bundle in the query string and identifies the device
//! in one of two ways:
//! - `signature`: the client's certificate fingerprint, checked against the
//!   bundle's signing key; the device spec travels as the JSON body.
//! - `device-id`: an id returned by `POST /register`; the registered spec is
//!   used and any body is ignored.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use crate::throttle;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use splitstore_core::{BundleId, BundleRecord, DeviceId, DeviceSpec, SplitRequest};
use splitstore_signer::fingerprints_match;
use splitstore_splits::archive;

/// Response header naming where the split set came from.
pub const SOURCE_HEADER: &str = "x-splitstore-source";

/// Query parameters of `GET|POST /download`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadParams {
    pub application_id: String,
    pub version: String,
    pub variant: String,
    pub device_id: Option<String>,
    pub signature: Option<String>,
    /// Comma-separated language codes.
    pub languages: Option<String>,
    /// Comma-separated on-demand module names.
    pub features: Option<String>,
    /// Per-chunk delay in milliseconds.
    pub throttle: Option<String>,
    /// `true`/`false`, `1`/`0` or `yes`/`no`.
    pub include_missing: Option<String>,
}

/// How the device was identified.
#[derive(Debug)]
enum Identification {
    Registered(DeviceId),
    Signature(String),
}

impl Identification {
    fn mode(&self) -> &'static str {
        match self {
            Self::Registered(_) => "registration",
            Self::Signature(_) => "signature",
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn split_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl DownloadParams {
    fn bundle_id(&self) -> ApiResult<BundleId> {
        let version = BundleId::parse_version(&self.version)?;
        Ok(BundleId::new(
            self.application_id.trim(),
            self.variant.trim(),
            version,
        )?)
    }

    fn throttle(&self) -> ApiResult<Option<u64>> {
        non_empty(&self.throttle)
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid throttle: {v}")))
            })
            .transpose()
    }

    fn include_missing(&self) -> ApiResult<bool> {
        match non_empty(&self.include_missing)
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("false" | "0" | "no") => Ok(false),
            Some("true" | "1" | "yes") => Ok(true),
            Some(other) => Err(ApiError::BadRequest(format!(
                "invalid include-missing: {other}"
            ))),
        }
    }

    fn identification(&self) -> ApiResult<Identification> {
        match (non_empty(&self.device_id), non_empty(&self.signature)) {
            (Some(id), None) => Ok(Identification::Registered(DeviceId::parse(id)?)),
            (None, Some(signature)) => Ok(Identification::Signature(signature.to_string())),
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "device-id and signature are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ApiError::BadRequest(
                "one of device-id or signature is required".to_string(),
            )),
        }
    }
}

fn body_spec(body: &Bytes) -> ApiResult<Option<DeviceSpec>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadRequest(format!("invalid device spec: {e}")))
}

/// Establish the device spec, enforcing the fingerprint check in signature mode.
async fn device_spec(
    state: &AppState,
    identification: &Identification,
    record: &BundleRecord,
    body: &Bytes,
) -> ApiResult<DeviceSpec> {
    match identification {
        Identification::Registered(device_id) => {
            let spec = state.devices.resolve(device_id).await?;
            Ok(spec.as_ref().clone())
        }
        Identification::Signature(claimed) => {
            if state.config.download.validate_signature {
                let actual = state.coordinator.certificate_fingerprint(record).await?;
                if !fingerprints_match(claimed, &actual) {
                    metrics::SIGNATURE_MISMATCHES.inc();
                    tracing::warn!(bundle = %record.id, "Certificate fingerprint mismatch");
                    return Err(ApiError::Forbidden(
                        "signature does not match the bundle signing key".to_string(),
                    ));
                }
            }
            body_spec(body)?.ok_or_else(|| {
                ApiError::BadRequest("signature mode requires a device spec body".to_string())
            })
        }
    }
}

/// GET|POST /download
pub async fn download_splits(
    State(state): State<AppState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Response> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = params.bundle_id()?;
    let identification = params.identification()?;
    let throttle = params.throttle()?;
    let include_missing = params.include_missing()?;

    // One record for both the fingerprint check and generation.
    let record = state.bundles.fetch(&id).await?;
    let spec = device_spec(&state, &identification, &record, &body).await?;

    let request = SplitRequest::new(
        spec,
        split_list(&params.features),
        split_list(&params.languages),
        include_missing,
    );
    let resolved = state.coordinator.resolve_record(record, request).await?;

    let archive = resolved.splits.archive.clone();
    let delay = state.config.download.effective_throttle(throttle);
    metrics::DOWNLOADS
        .with_label_values(&[identification.mode(), resolved.source.as_str()])
        .inc();
    metrics::DOWNLOAD_BYTES.inc_by(archive.len() as u64);
    tracing::info!(
        bundle = %id,
        mode = identification.mode(),
        source = resolved.source.as_str(),
        splits = resolved.splits.set.len(),
        bytes = archive.len(),
        throttle_ms = delay.as_millis() as u64,
        "Serving split set"
    );

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, archive::CONTENT_TYPE.to_string()),
            (CONTENT_LENGTH, archive.len().to_string()),
        ],
        [(SOURCE_HEADER, resolved.source.as_str())],
        throttle::body(
            archive,
            delay,
            state.config.download.throttle_chunk_bytes,
        ),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(device_id: Option<&str>, signature: Option<&str>) -> DownloadParams {
        DownloadParams {
            application_id: "application".to_string(),
            version: "23".to_string(),
            variant: "variant".to_string(),
            device_id: device_id.map(str::to_string),
            signature: signature.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_identification_modes() {
        let id = DeviceId::new().to_string();
        assert!(matches!(
            params(Some(&id), None).identification(),
            Ok(Identification::Registered(_))
        ));
        assert!(matches!(
            params(None, Some("ab:cd")).identification(),
            Ok(Identification::Signature(_))
        ));
        assert!(params(Some(&id), Some("ab")).identification().is_err());
        assert!(params(None, None).identification().is_err());
        // Blank values count as absent.
        assert!(params(Some(" "), Some("")).identification().is_err());
        assert!(params(Some("not-a-uuid"), None).identification().is_err());
    }

    #[test]
    fn test_blank_optional_values_count_as_absent() {
        let mut p = params(None, Some("ab"));
        p.throttle = Some(String::new());
        p.include_missing = Some(" ".to_string());
        assert_eq!(p.throttle().unwrap(), None);
        assert!(!p.include_missing().unwrap());

        p.throttle = Some(" 25 ".to_string());
        p.include_missing = Some("1".to_string());
        assert_eq!(p.throttle().unwrap(), Some(25));
        assert!(p.include_missing().unwrap());

        p.include_missing = Some("TRUE".to_string());
        assert!(p.include_missing().unwrap());
        p.include_missing = Some("no".to_string());
        assert!(!p.include_missing().unwrap());

        p.throttle = Some("fast".to_string());
        p.include_missing = Some("maybe".to_string());
        assert!(matches!(p.throttle(), Err(ApiError::BadRequest(_))));
        assert!(matches!(p.include_missing(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(&Some("it, de,,ko ".to_string())),
            vec!["it", "de", "ko"]
        );
        assert!(split_list(&None).is_empty());
    }

    #[test]
    fn test_body_spec() {
        assert!(body_spec(&Bytes::new()).unwrap().is_none());
        assert!(body_spec(&Bytes::from_static(b" \n")).unwrap().is_none());
        assert!(body_spec(&Bytes::from_static(b"{")).is_err());

        let spec = body_spec(&Bytes::from_static(
            br#"{"supportedAbis":["x86_64"],"screenDensity":160,"sdkVersion":30}"#,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(spec.screen_density, 160);
    }
}
