//! Integration tests for UpdatesClient.
//!
//! Uses wiremock for HTTP mocking. Tests cover single-part and multipart
//! manifests, both signature paths, multi-manifest selection, filter checks,
//! status mapping, retry behavior and asset downloads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::json;
use sha2::Digest;
use tempfile::TempDir;
use updates_loader::{
    AssetDescriptor, CodeSigningConfig, HttpRequest, HttpResponse, ManifestKind, ReqwestTransport,
    StaticPublicKey, Transport, UpdatesClient, UpdatesConfig, UpdatesError, UpdatesResult,
    VerificationPolicy,
};
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestKey {
    private: RsaPrivateKey,
    public_pem: String,
}

fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("keygen");
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("pem");
        TestKey {
            private,
            public_pem,
        }
    })
}

fn sign(data: &[u8]) -> String {
    let signing_key = SigningKey::<Sha256>::new(test_key().private.clone());
    BASE64.encode(signing_key.sign(data).to_bytes())
}

fn base_config(mock_server: &MockServer) -> UpdatesConfig {
    UpdatesConfig::default()
        .with_update_url(format!("{}/manifest", mock_server.uri()))
        .with_sdk_version("41.0.0")
        .with_legacy_public_key_url(format!("{}/public-key", mock_server.uri()))
}

fn json_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_bytes(body.as_bytes().to_vec())
        .insert_header("content-type", "application/json")
}

fn multipart_body(boundary: &str, parts: &[(&str, Option<(&str, &str)>, &str)]) -> String {
    let mut body = String::from("preamble\r\n");
    for (name, part_header, content) in parts {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str(&format!("Content-Disposition: inline; name=\"{}\"\r\n", name));
        if let Some((header_name, value)) = part_header {
            body.push_str(&format!("{}: {}\r\n", header_name, value));
        }
        body.push_str("\r\n");
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    body
}

#[tokio::test]
async fn test_single_part_unsigned_manifest() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-platform", "android"))
        .and(header("expo-api-version", "1"))
        .and(header("expo-sdk-version", "41.0.0"))
        .and(header("expo-accept-signature", "false"))
        .respond_with(
            json_response(r#"{"id":"update-1","launchAsset":{"key":"bundle","url":"https://cdn.example.com/b"}}"#)
                .insert_header("expo-protocol-version", "0"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = UpdatesClient::new(base_config(&mock_server)).unwrap();
    let manifest = client.download_manifest(None, None).await.unwrap();

    assert_eq!(manifest.kind(), ManifestKind::New);
    assert_eq!(manifest.id(), Some("update-1"));
    assert!(!manifest.is_verified());
    assert!(manifest.extensions().is_none());
    assert_eq!(manifest.assets().unwrap().len(), 1);
}

#[tokio::test]
async fn test_multipart_manifest_with_extensions() {
    let mock_server = MockServer::start().await;

    let body = multipart_body(
        "updates-boundary",
        &[
            ("extensions", None, r#"{"assetRequestHeaders":{"bundle":{"x-asset-token":"t1"}}}"#),
            ("directive", None, r#"{"type":"noUpdateAvailable"}"#),
            (
                "manifest",
                Some(("content-type", "application/json")),
                r#"{"id":"update-2","launchAsset":{"key":"bundle","url":"https://cdn.example.com/b"}}"#,
            ),
        ],
    );

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.into_bytes())
                .insert_header("content-type", "multipart/mixed; boundary=updates-boundary")
                .insert_header("expo-protocol-version", "1"),
        )
        .mount(&mock_server)
        .await;

    let client = UpdatesClient::new(base_config(&mock_server)).unwrap();
    let manifest = client.download_manifest(None, None).await.unwrap();

    assert_eq!(manifest.id(), Some("update-2"));
    assert!(manifest.extensions().is_some());

    let assets = manifest.assets().unwrap();
    assert_eq!(
        assets[0].extra_request_headers.get("x-asset-token").map(String::as_str),
        Some("t1")
    );
}

#[tokio::test]
async fn test_multipart_without_boundary_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"--x\r\n\r\n{}\r\n--x--".to_vec())
                .insert_header("content-type", "multipart/mixed"),
        )
        .mount(&mock_server)
        .await;

    let client = UpdatesClient::new(base_config(&mock_server)).unwrap();
    let err = client.download_manifest(None, None).await.unwrap_err();

    assert!(matches!(err, UpdatesError::MalformedResponse { .. }));
    assert!(err.to_string().contains("missing boundary"));
}

#[tokio::test]
async fn test_legacy_header_signature_with_remote_key() {
    let mock_server = MockServer::start().await;

    let body = r#"{"id":"signed-1","bundleUrl":"https://cdn.example.com/b.js"}"#;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-accept-signature", "true"))
        .respond_with(json_response(body).insert_header("expo-manifest-signature", sign(body.as_bytes()).as_str()))
        .expect(2)
        .mount(&mock_server)
        .await;

    // The key is fetched once and cached.
    Mock::given(method("GET"))
        .and(path("/public-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(test_key().public_pem.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = base_config(&mock_server).with_expects_signed_manifest(true);
    let client = UpdatesClient::new(config).unwrap();

    for _ in 0..2 {
        let manifest = client.download_manifest(None, None).await.unwrap();
        assert!(manifest.is_verified());
        assert_eq!(manifest.kind(), ManifestKind::Legacy);
        assert_eq!(manifest.raw_json().get("isVerified"), Some(&json!(true)));
    }
}

#[tokio::test]
async fn test_embedded_signature_and_bad_signature() {
    let mock_server = MockServer::start().await;

    let manifest_string = r#"{"id":"embedded-1","sdkVersion":"41.0.0"}"#;
    let good = json!({"manifestString": manifest_string, "signature": sign(manifest_string.as_bytes())});

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-release-channel", "good"))
        .respond_with(json_response(&good.to_string()))
        .mount(&mock_server)
        .await;

    let bad = json!({"manifestString": manifest_string, "signature": sign(b"another manifest")});
    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-release-channel", "bad"))
        .respond_with(json_response(&bad.to_string()))
        .mount(&mock_server)
        .await;

    let keys = Arc::new(StaticPublicKey::from_pem(&test_key().public_pem).unwrap());

    let client = UpdatesClient::new(base_config(&mock_server).with_release_channel("good"))
        .unwrap()
        .with_public_key_provider(keys.clone());
    let manifest = client.download_manifest(None, None).await.unwrap();
    assert_eq!(manifest.id(), Some("embedded-1"));
    assert!(manifest.is_verified());

    let client = UpdatesClient::new(base_config(&mock_server).with_release_channel("bad"))
        .unwrap()
        .with_public_key_provider(keys);
    let err = client.download_manifest(None, None).await.unwrap_err();
    assert!(matches!(err, UpdatesError::SignatureInvalid { .. }));
}

#[tokio::test]
async fn test_unsigned_sentinel_is_not_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(json_response(r#"{"id":"u"}"#).insert_header("expo-manifest-signature", "UNSIGNED"))
        .mount(&mock_server)
        .await;

    // No public key mock: the key must not be requested.
    let config = base_config(&mock_server).with_expects_signed_manifest(true);
    let manifest = UpdatesClient::new(config)
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap();

    assert!(!manifest.is_verified());
    assert_eq!(manifest.raw_json().get("isVerified"), Some(&json!(false)));
}

#[tokio::test]
async fn test_code_signing() {
    let mock_server = MockServer::start().await;

    let body = r#"{"id":"cs-1"}"#;
    let signature_header = format!("sig=\"{}\", keyid=\"root\", alg=\"rsa-v1_5-sha256\"", sign(body.as_bytes()));

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header_exists("expo-expects-signature"))
        .and(header("expo-release-channel", "good"))
        .respond_with(json_response(body).insert_header("expo-signature", signature_header.as_str()))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-release-channel", "tampered"))
        .respond_with(json_response(r#"{"id":"cs-2"}"#).insert_header("expo-signature", signature_header.as_str()))
        .mount(&mock_server)
        .await;

    let code_signing = CodeSigningConfig::new(test_key().public_pem.clone());

    let config = base_config(&mock_server)
        .with_release_channel("good")
        .with_code_signing(code_signing.clone())
        .with_verification_policy(VerificationPolicy::CodeSigningSuffices);
    let manifest = UpdatesClient::new(config)
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap();
    assert_eq!(manifest.id(), Some("cs-1"));
    assert!(manifest.is_verified());

    let config = base_config(&mock_server)
        .with_release_channel("tampered")
        .with_code_signing(code_signing);
    let err = UpdatesClient::new(config)
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdatesError::SignatureInvalid { .. }));
}

#[tokio::test]
async fn test_multi_manifest_selection() {
    let mock_server = MockServer::start().await;

    let body = r#"[{"sdkVersion":"39","id":"old"},{"sdkVersion":"41","id":"x"},{"sdkVersion":"40","id":"y"}]"#;
    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(json_response(body))
        .mount(&mock_server)
        .await;

    let config = base_config(&mock_server).with_sdk_version("40,41");
    let manifest = UpdatesClient::new(config)
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap();
    assert_eq!(manifest.id(), Some("x"));

    let config = base_config(&mock_server).with_sdk_version("42");
    let err = UpdatesClient::new(config)
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap_err();
    match err {
        UpdatesError::Incompatible { accepted, body: raw } => {
            assert_eq!(accepted, "42");
            assert_eq!(raw, body);
        }
        other => panic!("expected Incompatible, got {:?}", other),
    }
}

#[tokio::test]
async fn test_filter_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(
            json_response(r#"{"id":"f1","metadata":{"branchname":"main"}}"#)
                .insert_header("expo-protocol-version", "0")
                .insert_header("expo-manifest-filters", "branchname=\"production\""),
        )
        .mount(&mock_server)
        .await;

    let err = UpdatesClient::new(base_config(&mock_server))
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdatesError::FilterMismatch { .. }));
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = UpdatesClient::new(base_config(&mock_server))
        .unwrap()
        .download_manifest(None, None)
        .await
        .unwrap_err();
    match err {
        UpdatesError::HttpStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected HttpStatus, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fatal_error_header_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .and(header("expo-fatal-error", "crashed on launch"))
        .and(header("expo-current-update-id", "abc"))
        .respond_with(json_response(r#"{"id":"after-crash"}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let extra = json!({"Expo-Current-Update-ID": "abc"});
    let manifest = UpdatesClient::new(base_config(&mock_server))
        .unwrap()
        .download_manifest(extra.as_object(), Some("crashed on launch"))
        .await
        .unwrap();
    assert_eq!(manifest.id(), Some("after-crash"));
}

/// Fails the first `failures` requests with a transport error.
struct FlakyTransport {
    inner: ReqwestTransport,
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, request: HttpRequest) -> UpdatesResult<HttpResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(UpdatesError::Transport {
                message: format!("connection reset (call {})", call + 1),
            });
        }
        self.inner.send(request).await
    }
}

fn flaky(failures: usize) -> Arc<FlakyTransport> {
    Arc::new(FlakyTransport {
        inner: ReqwestTransport::new(Duration::from_secs(5)).unwrap(),
        failures,
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn test_transport_failure_retried_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest"))
        .respond_with(json_response(r#"{"id":"retried"}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = flaky(1);
    let client = UpdatesClient::with_transport(base_config(&mock_server), transport.clone()).unwrap();
    let manifest = client.download_manifest(None, None).await.unwrap();

    assert_eq!(manifest.id(), Some("retried"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_transport_failure_surfaces() {
    let mock_server = MockServer::start().await;

    let transport = flaky(5);
    let client = UpdatesClient::with_transport(base_config(&mock_server), transport.clone()).unwrap();
    let err = client.download_manifest(None, None).await.unwrap_err();

    assert!(err.to_string().contains("call 2"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

fn asset_hash(content: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(sha2::Sha256::digest(content))
}

#[tokio::test]
async fn test_asset_download_is_idempotent() {
    let mock_server = MockServer::start().await;
    let content = b"console.log('hello');";

    Mock::given(method("GET"))
        .and(path("/assets/bundle"))
        .and(header("x-asset-token", "t1"))
        .and(header("expo-platform", "android"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let asset = AssetDescriptor::new(
        "bundle-abc",
        Some(Url::parse(&format!("{}/assets/bundle", mock_server.uri())).unwrap()),
    )
    .with_file_extension(".js")
    .with_expected_hash(asset_hash(content))
    .with_request_header("x-asset-token", "t1");

    let client = UpdatesClient::new(base_config(&mock_server)).unwrap();

    let first = client.download_asset(&asset, dir.path()).await.unwrap();
    assert!(first.is_new);
    assert_eq!(first.asset.relative_path.as_deref(), Some("bundle-abc.js"));
    assert!(first.asset.hash.is_some());
    assert_eq!(std::fs::read(dir.path().join("bundle-abc.js")).unwrap(), content);

    let second = client.download_asset(&asset, dir.path()).await.unwrap();
    assert!(!second.is_new);
    assert_eq!(second.asset.relative_path.as_deref(), Some("bundle-abc.js"));
}

#[tokio::test]
async fn test_asset_transport_failure_retried_once() {
    let mock_server = MockServer::start().await;
    let content = b"retried asset";

    Mock::given(method("GET"))
        .and(path("/assets/retried"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let asset = AssetDescriptor::new(
        "retried",
        Some(Url::parse(&format!("{}/assets/retried", mock_server.uri())).unwrap()),
    )
    .with_expected_hash(asset_hash(content));

    let transport = flaky(1);
    let client = UpdatesClient::with_transport(base_config(&mock_server), transport.clone()).unwrap();
    let download = client.download_asset(&asset, dir.path()).await.unwrap();

    assert!(download.is_new);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(dir.path().join("retried")).unwrap(), content);
}

#[tokio::test]
async fn test_asset_hash_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/image"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"corrupted".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let asset = AssetDescriptor::new(
        "image",
        Some(Url::parse(&format!("{}/assets/image", mock_server.uri())).unwrap()),
    )
    .with_file_extension("png")
    .with_expected_hash(asset_hash(b"original"));

    let err = UpdatesClient::new(base_config(&mock_server))
        .unwrap()
        .download_asset(&asset, dir.path())
        .await
        .unwrap_err();

    match err {
        UpdatesError::HashMismatch { key, expected, actual } => {
            assert_eq!(key, "image");
            assert_eq!(expected, asset_hash(b"original").to_lowercase());
            assert_eq!(actual, asset_hash(b"corrupted"));
        }
        other => panic!("expected HashMismatch, got {:?}", other),
    }
    assert!(!dir.path().join("image.png").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
