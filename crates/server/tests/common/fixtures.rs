//! Test fixtures: bundles, keystores, device specs and multipart bodies.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::{Value, json};
use splitstore_core::SigningConfig;
use splitstore_signer::Keystore;
use splitstore_splits::archive;

pub const KEY_ALIAS: &str = "upload";
pub const STORE_PASSWORD: &str = "store-pw-3f9a";
pub const KEY_PASSWORD: &str = "key-pw-81c2";

pub const MULTIPART_BOUNDARY: &str = "splitstore-test-boundary";

/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn signing_config() -> SigningConfig {
    SigningConfig {
        key_alias: KEY_ALIAS.to_string(),
        store_password: STORE_PASSWORD.to_string(),
        key_password: KEY_PASSWORD.to_string(),
    }
}

#[allow(dead_code)]
pub fn signing_config_json() -> String {
    json!({
        "keyAlias": KEY_ALIAS,
        "storePassword": STORE_PASSWORD,
        "keyPassword": KEY_PASSWORD,
    })
    .to_string()
}

/// A fresh keystore holding one key under [`KEY_ALIAS`].
#[allow(dead_code)]
pub fn keystore() -> Bytes {
    Bytes::from(Keystore::generate(KEY_ALIAS, STORE_PASSWORD, KEY_PASSWORD).to_bytes())
}

/// Certificate fingerprint of the key in `keystore`.
#[allow(dead_code)]
pub fn fingerprint(keystore: &[u8]) -> String {
    Keystore::open(keystore, &signing_config())
        .expect("open keystore")
        .fingerprint()
}

/// A base module plus an on-demand `ondemandfeature`, with language and
/// density resources in both.
#[allow(dead_code)]
pub fn sample_bundle(marker: &str) -> Bytes {
    let master = format!("base-dex-{marker}");
    archive::pack([
        ("base/master/classes.dex", master.as_bytes()),
        ("base/lang-it/strings.xml", b"ciao".as_slice()),
        ("base/lang-de/strings.xml", b"hallo".as_slice()),
        ("base/lang-ko/strings.xml", b"annyeong".as_slice()),
        ("base/density-xhdpi/icon.png", b"icon-xhdpi".as_slice()),
        ("base/density-xxhdpi/icon.png", b"icon-xxhdpi".as_slice()),
        ("base/abi-arm64-v8a/libapp.so", b"arm64".as_slice()),
        (
            "ondemandfeature/module.json",
            br#"{"delivery":"on-demand"}"#.as_slice(),
        ),
        ("ondemandfeature/master/classes.dex", b"feature-dex".as_slice()),
        ("ondemandfeature/lang-it/strings.xml", b"feature-it".as_slice()),
        ("ondemandfeature/lang-de/strings.xml", b"feature-de".as_slice()),
        ("ondemandfeature/lang-ko/strings.xml", b"feature-ko".as_slice()),
        ("ondemandfeature/density-xxhdpi/art.png", b"feature-art".as_slice()),
    ])
    .expect("pack bundle")
}

/// Device spec JSON for an arm64 phone at `density`.
#[allow(dead_code)]
pub fn device_spec(density: i32) -> Value {
    json!({
        "supportedAbis": ["arm64-v8a"],
        "supportedLocales": ["en-US"],
        "deviceFeatures": [],
        "glExtensions": [],
        "screenDensity": density,
        "sdkVersion": 34,
    })
}

#[allow(dead_code)]
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// One part of a multipart form.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

/// Encode `parts` as a `multipart/form-data` body delimited by [`MULTIPART_BOUNDARY`].
#[allow(dead_code)]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.bin\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}
