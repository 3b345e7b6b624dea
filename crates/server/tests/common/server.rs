//! Server test utilities.

use crate::common::fixtures::{
    MULTIPART_BOUNDARY, Part, multipart_body, sample_bundle, signing_config_json,
};
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use splitstore_core::config::{AppConfig, StorageConfig};
use splitstore_server::{AppState, create_router};
use splitstore_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A collected response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Credentials attached by the request helpers when auth is configured.
    pub credentials: Option<String>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
        };
        modifier(&mut config);

        let credentials = match (&config.auth.username, &config.auth.password) {
            (Some(user), Some(password)) => {
                Some(crate::common::fixtures::basic_auth(user, password))
            }
            _ => None,
        };

        let state = AppState::new(config, storage);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            credentials,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request as-is.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Request builder with the server's credentials attached.
    pub fn builder(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match &self.credentials {
            Some(auth) => builder.header("Authorization", auth),
            None => builder,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(self.builder("GET", uri).body(Body::empty()).unwrap())
            .await
    }

    /// POST a JSON body.
    pub async fn post_json(&self, uri: &str, body: &Value) -> TestResponse {
        let request = self
            .builder("POST", uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// POST a multipart upload built from `parts`.
    pub async fn upload_parts(&self, parts: &[Part<'_>]) -> TestResponse {
        let request = self
            .builder("POST", "/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    /// Upload `bundle` for `application/variant/version` with the fixture signing config.
    pub async fn upload(
        &self,
        application_id: &str,
        variant: &str,
        version: i64,
        bundle: &[u8],
        keystore: &[u8],
    ) -> TestResponse {
        let version = version.to_string();
        let signing = signing_config_json();
        self.upload_parts(&[
            Part::Text("application-id", application_id),
            Part::Text("version", &version),
            Part::Text("variant", variant),
            Part::Text("signing-config", &signing),
            Part::File("bundle", bundle),
            Part::File("keystore", keystore),
        ])
        .await
    }

    /// Upload the sample bundle as `application/variant/23`.
    pub async fn upload_sample(&self, keystore: &[u8]) -> TestResponse {
        self.upload("application", "variant", 23, &sample_bundle("v1"), keystore)
            .await
    }

    /// Register `spec` and return the device id.
    pub async fn register(&self, spec: &Value) -> String {
        let response = self.post_json("/register", spec).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        response.text()
    }

    /// Download with `query`, sending `spec` as the JSON body when given.
    pub async fn download(&self, query: &str, spec: Option<&Value>) -> TestResponse {
        let uri = format!("/download?{query}");
        let request = match spec {
            Some(spec) => self
                .builder("POST", &uri)
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(spec).unwrap()))
                .unwrap(),
            None => self.builder("GET", &uri).body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}
