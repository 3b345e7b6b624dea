//! Basic authentication and request tracing middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use splitstore_core::config::AuthConfig;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request trace id, in both directions.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Paths served without credentials.
const PUBLIC_PATHS: &[&str] = &["/v1/health", "/metrics"];

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.trim().is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller identity established by basic auth.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Decode `Authorization: Basic ...` into username and password.
/// The scheme is case-insensitive.
fn extract_basic_credentials(req: &Request) -> Option<(String, String)> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    if value.len() < 6 || !value[..6].eq_ignore_ascii_case("basic ") {
        return None;
    }
    let decoded = STANDARD.decode(value[6..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the request's credentials against the configured pair.
fn authenticate(config: &AuthConfig, req: &Request) -> ApiResult<AuthenticatedUser> {
    let (Some(expected_user), Some(expected_password)) =
        (config.username.as_deref(), config.password.as_deref())
    else {
        return Err(ApiError::Internal("auth is not configured".to_string()));
    };

    let (username, password) = extract_basic_credentials(req)
        .ok_or_else(|| ApiError::Unauthorized("basic credentials required".to_string()))?;

    // Evaluate both comparisons so timing does not reveal which one failed.
    let user_ok = constant_time_eq(username.as_bytes(), expected_user.as_bytes());
    let password_ok = constant_time_eq(password.as_bytes(), expected_password.as_bytes());
    if user_ok & password_ok {
        Ok(AuthenticatedUser { username })
    } else {
        Err(ApiError::Unauthorized("invalid credentials".to_string()))
    }
}

/// Authentication middleware that checks credentials and sets up trace context.
///
/// Every response carries the trace id in `X-Trace-Id`.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    req.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut response = async move {
        let path = req.uri().path();
        if state.config.auth.enabled() && !PUBLIC_PATHS.contains(&path) {
            match authenticate(&state.config.auth, &req) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected request");
                    let mut response = e.into_response();
                    response.headers_mut().insert(
                        WWW_AUTHENTICATE,
                        HeaderValue::from_static("Basic realm=\"splitstore\""),
                    );
                    return response;
                }
            }
        }
        next.run(req).await
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
