//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{
    KEY_PASSWORD, Part, STORE_PASSWORD, TestServer, basic_auth, device_spec, fingerprint,
    keystore, sample_bundle, signing_config_json,
};
use serde_json::json;
use splitstore_signer::verify_signed_apk;
use splitstore_splits::archive;
use std::time::{Duration, Instant};

const BUNDLE_QUERY: &str = "application-id=application&version=23&variant=variant";

fn entry_names(body: &[u8]) -> Vec<String> {
    archive::unpack(body)
        .expect("tar body")
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

/// `ab:CD:...` rendering of a hex fingerprint.
fn colon_upper(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server.get("/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
    assert_eq!(response.json()["storage"], "filesystem");
}

#[tokio::test]
async fn test_upload_and_bundle_info_without_secrets() {
    let server = TestServer::new().await;
    let keystore = keystore();

    let response = server.upload_sample(&keystore).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    let ack = response.json();
    assert_eq!(ack["applicationId"], "application");
    assert_eq!(ack["variant"], "variant");
    assert_eq!(ack["versionCode"], 23);
    assert_eq!(ack["replaced"], false);
    assert_eq!(ack["bundleSize"], sample_bundle("v1").len() as u64);

    let info = server.get("/bundles/application/variant/23").await;
    assert_eq!(info.status, StatusCode::OK);
    assert_eq!(info.json()["revision"], ack["revision"]);
    assert_eq!(info.json()["keyAlias"], "upload");
    let text = info.text();
    assert!(!text.contains(STORE_PASSWORD));
    assert!(!text.contains(KEY_PASSWORD));
}

#[tokio::test]
async fn test_duplicate_upload_conflicts() {
    let server = TestServer::new().await;
    let keystore = keystore();

    let first = server.upload_sample(&keystore).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = server
        .upload("application", "variant", 23, &sample_bundle("v2"), &keystore)
        .await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.json()["code"], "conflict");

    // The original record is untouched.
    let info = server.get("/bundles/application/variant/23").await;
    assert_eq!(info.json()["revision"], first.json()["revision"]);
    assert_eq!(info.json()["bundleSha256"], first.json()["bundleSha256"]);
}

#[tokio::test]
async fn test_override_replaces_record_and_splits() {
    let server = TestServer::with_config(|c| c.bundles.override_existing = true).await;
    let keystore = keystore();
    let signature = fingerprint(&keystore);
    let query = format!("{BUNDLE_QUERY}&signature={signature}");

    let first = server.upload_sample(&keystore).await;
    let before = server.download(&query, Some(&device_spec(320))).await;
    assert_eq!(before.status, StatusCode::OK);

    let second = server
        .upload("application", "variant", 23, &sample_bundle("v2"), &keystore)
        .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.json()["replaced"], true);
    assert_ne!(second.json()["revision"], first.json()["revision"]);

    let info = server.get("/bundles/application/variant/23").await;
    assert_eq!(info.json()["revision"], second.json()["revision"]);

    let after = server.download(&query, Some(&device_spec(320))).await;
    assert_eq!(after.status, StatusCode::OK);
    assert_eq!(after.header("x-splitstore-source"), Some("generated"));
    assert_ne!(before.body, after.body);
}

#[tokio::test]
async fn test_malformed_uploads_rejected() {
    let server = TestServer::new().await;
    let keystore = keystore();
    let bundle = sample_bundle("v1");
    let signing = signing_config_json();

    // Missing keystore part.
    let response = server
        .upload_parts(&[
            Part::Text("application-id", "application"),
            Part::Text("version", "23"),
            Part::Text("variant", "variant"),
            Part::Text("signing-config", &signing),
            Part::File("bundle", &bundle),
        ])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["message"].as_str().unwrap().contains("keystore"));

    // Unparseable version.
    let response = server
        .upload_parts(&[
            Part::Text("application-id", "application"),
            Part::Text("version", "twenty-three"),
            Part::Text("variant", "variant"),
            Part::Text("signing-config", &signing),
            Part::File("bundle", &bundle),
            Part::File("keystore", &keystore),
        ])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Signing config that is not JSON.
    let response = server
        .upload_parts(&[
            Part::Text("application-id", "application"),
            Part::Text("version", "23"),
            Part::Text("variant", "variant"),
            Part::Text("signing-config", "alias=upload"),
            Part::File("bundle", &bundle),
            Part::File("keystore", &keystore),
        ])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Wrong store password: the keystore cannot be opened.
    let wrong = json!({
        "keyAlias": "upload",
        "storePassword": "not-the-password",
        "keyPassword": KEY_PASSWORD,
    })
    .to_string();
    let response = server
        .upload_parts(&[
            Part::Text("application-id", "application"),
            Part::Text("version", "23"),
            Part::Text("variant", "variant"),
            Part::Text("signing-config", &wrong),
            Part::File("bundle", &bundle),
            Part::File("keystore", &keystore),
        ])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(!response.text().contains("not-the-password"));

    // Nothing was stored.
    let info = server.get("/bundles/application/variant/23").await;
    assert_eq!(info.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_over_size_limit_rejected() {
    let server = TestServer::with_config(|c| c.server.max_upload_bytes = 1024).await;
    let keystore = keystore();
    let bundle = vec![7u8; 4096];

    let response = server
        .upload("application", "variant", 23, &bundle, &keystore)
        .await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_basic_auth_enforced() {
    let server = TestServer::with_config(|c| {
        c.auth.username = Some("ci".to_string());
        c.auth.password = Some("hunter2".to_string());
    })
    .await;

    // Health stays open.
    let health = server
        .send(Request::get("/v1/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(health.status, StatusCode::OK);

    let anonymous = server
        .send(
            Request::get("/bundles/application/variant/23")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert!(anonymous.header("www-authenticate").is_some());

    let wrong = server
        .send(
            Request::get("/bundles/application/variant/23")
                .header("Authorization", basic_auth("ci", "wrong"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json()["code"], "unauthorized");

    // Correct credentials reach the handler.
    let authorized = server.get("/bundles/application/variant/23").await;
    assert_eq!(authorized.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trace_id_echoed() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::get("/v1/health")
                .header("X-Trace-Id", "build-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.header("x-trace-id"), Some("build-42"));

    let generated = server.get("/v1/health").await;
    assert!(generated.header("x-trace-id").is_some());
}

#[tokio::test]
async fn test_unknown_bundle_not_found() {
    let server = TestServer::new().await;
    let keystore = keystore();
    let query = format!(
        "application-id=missing&version=1&variant=release&signature={}",
        fingerprint(&keystore)
    );

    let response = server.download(&query, Some(&device_spec(320))).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["code"], "not_found");
}

#[tokio::test]
async fn test_dotted_identity_rejected() {
    let server = TestServer::new().await;
    let keystore = keystore();

    let upload = server
        .upload("com..example", "variant", 23, &sample_bundle("v1"), &keystore)
        .await;
    assert_eq!(upload.status, StatusCode::BAD_REQUEST, "{}", upload.text());

    let query = format!(
        "application-id=app&version=23&variant=a..b&signature={}",
        fingerprint(&keystore)
    );
    let download = server.download(&query, Some(&device_spec(320))).await;
    assert_eq!(download.status, StatusCode::BAD_REQUEST, "{}", download.text());
    assert_eq!(download.json()["code"], "bad_request");
}

#[tokio::test]
async fn test_register_and_download_by_device_id() {
    let server = TestServer::new().await;
    server.upload_sample(&keystore()).await;

    let device_id = server.register(&device_spec(320)).await;
    let response = server
        .download(
            &format!("{BUNDLE_QUERY}&device-id={device_id}&languages=de"),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    assert_eq!(response.header("content-type"), Some("application/x-tar"));
    assert_eq!(
        entry_names(&response.body),
        vec![
            "base-arm64-v8a.apk".to_string(),
            "base-de.apk".to_string(),
            "base-master.apk".to_string(),
            "base-xhdpi.apk".to_string(),
        ]
    );

    let unknown = server
        .download(
            &format!("{BUNDLE_QUERY}&device-id=00000000-0000-4000-8000-000000000000"),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_rejects_invalid_spec() {
    let server = TestServer::new().await;

    let response = server
        .post_json(
            "/register",
            &json!({"supportedAbis": [], "screenDensity": 320, "sdkVersion": 30}),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = server.post_json("/register", &json!({"screenDensity": "high"})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signature_mismatch_forbidden() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;

    let other = fingerprint(&common::keystore());
    let response = server
        .download(
            &format!("{BUNDLE_QUERY}&signature={other}"),
            Some(&device_spec(320)),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json()["code"], "forbidden");

    // Fingerprints are compared after normalization.
    let response = server
        .download(
            &format!("{BUNDLE_QUERY}&signature={}", colon_upper(&fingerprint(&keystore))),
            Some(&device_spec(320)),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_signature_mismatch_forbidden_regardless_of_device_spec() {
    let server = TestServer::new().await;
    server.upload_sample(&keystore()).await;
    let query = format!("{BUNDLE_QUERY}&signature={}", fingerprint(&common::keystore()));

    let no_body = server.download(&query, None).await;
    assert_eq!(no_body.status, StatusCode::FORBIDDEN);

    let mut invalid = device_spec(320);
    invalid["screenDensity"] = json!(0);
    let invalid_spec = server.download(&query, Some(&invalid)).await;
    assert_eq!(invalid_spec.status, StatusCode::FORBIDDEN);

    let malformed = server
        .send(
            server
                .builder("POST", &format!("/download?{query}"))
                .header("Content-Type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(malformed.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_signature_not_compared_when_validation_disabled() {
    let server = TestServer::with_config(|c| c.download.validate_signature = false).await;
    server.upload_sample(&keystore()).await;

    let response = server
        .download(
            &format!("{BUNDLE_QUERY}&signature=deadbeef"),
            Some(&device_spec(320)),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_identification_mode_required_exactly_once() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let device_id = server.register(&device_spec(320)).await;

    let both = server
        .download(
            &format!(
                "{BUNDLE_QUERY}&device-id={device_id}&signature={}",
                fingerprint(&keystore)
            ),
            Some(&device_spec(320)),
        )
        .await;
    assert_eq!(both.status, StatusCode::BAD_REQUEST);

    let neither = server.download(BUNDLE_QUERY, Some(&device_spec(320))).await;
    assert_eq!(neither.status, StatusCode::BAD_REQUEST);

    // Signature mode needs the device spec in the body.
    let no_body = server
        .download(
            &format!("{BUNDLE_QUERY}&signature={}", fingerprint(&keystore)),
            None,
        )
        .await;
    assert_eq!(no_body.status, StatusCode::BAD_REQUEST);

    let missing_bundle_params = server
        .download(&format!("device-id={device_id}"), None)
        .await;
    assert_eq!(missing_bundle_params.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_languages_and_on_demand_feature() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let signature = fingerprint(&keystore);

    let response = server
        .download(
            &format!(
                "{BUNDLE_QUERY}&signature={signature}&languages=it,de,ko&features=ondemandfeature"
            ),
            Some(&device_spec(480)),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());

    let entries = archive::unpack(&response.body).unwrap();
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    for expected in [
        "base-master.apk",
        "base-it.apk",
        "base-de.apk",
        "base-ko.apk",
        "ondemandfeature-master.apk",
        "ondemandfeature-it.apk",
        "ondemandfeature-de.apk",
        "ondemandfeature-ko.apk",
        "ondemandfeature-xxhdpi.apk",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    // Every split is signed with the uploaded key.
    for (name, data) in &entries {
        let verified = verify_signed_apk(data).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(verified.fingerprint, signature);
        assert_eq!(verified.alias, "upload");
    }
}

#[tokio::test]
async fn test_include_missing_emits_empty_language_splits() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let signature = fingerprint(&keystore);

    let query = format!("{BUNDLE_QUERY}&signature={signature}&languages=fr");
    let without = server.download(&query, Some(&device_spec(320))).await;
    assert!(!entry_names(&without.body).contains(&"base-fr.apk".to_string()));

    let with = server
        .download(&format!("{query}&include-missing=1"), Some(&device_spec(320)))
        .await;
    assert_eq!(with.status, StatusCode::OK);
    assert!(entry_names(&with.body).contains(&"base-fr.apk".to_string()));
}

#[tokio::test]
async fn test_language_colliding_with_split_names_rejected() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let signature = fingerprint(&keystore);

    for language in ["master", "xxhdpi", "it%2Fx"] {
        let response = server
            .download(
                &format!(
                    "{BUNDLE_QUERY}&signature={signature}&languages={language}&include-missing=true"
                ),
                Some(&device_spec(320)),
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{language}");
        assert_eq!(response.json()["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_concurrent_identical_downloads_share_generation() {
    let server = TestServer::new().await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let query = format!(
        "{BUNDLE_QUERY}&signature={}&languages=it",
        fingerprint(&keystore)
    );
    let spec = device_spec(480);

    let responses =
        futures::future::join_all((0..8).map(|_| server.download(&query, Some(&spec)))).await;

    let generated = responses
        .iter()
        .filter(|r| r.header("x-splitstore-source") == Some("generated"))
        .count();
    assert_eq!(generated, 1);
    for response in &responses {
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, responses[0].body);
    }
}

#[tokio::test]
async fn test_throttled_download_is_paced() {
    let server = TestServer::with_config(|c| c.download.throttle_chunk_bytes = 2048).await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let query = format!("{BUNDLE_QUERY}&signature={}", fingerprint(&keystore));

    let unthrottled = server.download(&query, Some(&device_spec(320))).await;
    assert_eq!(unthrottled.status, StatusCode::OK);

    let delay = Duration::from_millis(10);
    let chunks = unthrottled.body.len().div_ceil(2048) as u32;
    let started = Instant::now();
    let throttled = server
        .download(&format!("{query}&throttle=10"), Some(&device_spec(320)))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(throttled.status, StatusCode::OK);
    assert_eq!(throttled.body, unthrottled.body);
    assert!(elapsed >= delay * chunks, "{elapsed:?} for {chunks} chunks");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    splitstore_server::metrics::register_metrics();

    let response = server.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text().contains("splitstore_"));

    let disabled = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    assert_eq!(disabled.get("/metrics").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_throttle_uses_server_default() {
    let server = TestServer::with_config(|c| {
        c.download.throttle_chunk_bytes = 2048;
        c.download.default_throttle_ms = 10;
    })
    .await;
    let keystore = keystore();
    server.upload_sample(&keystore).await;
    let query = format!(
        "{BUNDLE_QUERY}&signature={}&include-missing=",
        fingerprint(&keystore)
    );

    let started = Instant::now();
    let response = server
        .download(&format!("{query}&throttle="), Some(&device_spec(320)))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    let chunks = response.body.len().div_ceil(2048) as u32;
    assert!(
        elapsed >= Duration::from_millis(10) * chunks,
        "{elapsed:?} for {chunks} chunks"
    );

    let garbage = server
        .download(&format!("{query}&throttle=fast"), Some(&device_spec(320)))
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);
}
