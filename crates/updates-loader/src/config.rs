//! Loader configuration.

use std::collections::BTreeMap;

use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{UpdatesError, UpdatesResult};

/// Signature algorithms accepted on the code-signing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CodeSigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    #[default]
    #[serde(rename = "rsa-v1_5-sha256")]
    RsaV15Sha256,
}

impl CodeSigningAlgorithm {
    /// Wire identifier used in signature headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaV15Sha256 => "rsa-v1_5-sha256",
        }
    }

    /// Parse a wire identifier.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rsa-v1_5-sha256" => Some(Self::RsaV15Sha256),
            _ => None,
        }
    }
}

/// Trust configuration for the code-signing verification path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSigningConfig {
    /// Trust anchor public key (PEM, SubjectPublicKeyInfo).
    pub trust_anchor_pem: String,

    /// Key identifier the server must sign with.
    #[serde(default = "default_key_id")]
    pub key_id: String,

    /// Accepted signature algorithm.
    #[serde(default)]
    pub algorithm: CodeSigningAlgorithm,
}

fn default_key_id() -> String {
    "root".to_string()
}

impl CodeSigningConfig {
    pub fn new(trust_anchor_pem: impl Into<String>) -> Self {
        Self {
            trust_anchor_pem: trust_anchor_pem.into(),
            key_id: default_key_id(),
            algorithm: CodeSigningAlgorithm::default(),
        }
    }

    /// Set the expected key id.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Decode the trust anchor.
    pub fn public_key(&self) -> UpdatesResult<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(&self.trust_anchor_pem).map_err(|e| {
            UpdatesError::config(format!("invalid code signing trust anchor: {}", e))
        })
    }

    /// Value of the `expo-expects-signature` request header.
    pub fn accept_signature_header(&self) -> String {
        format!(
            "sig, keyid=\"{}\", alg=\"{}\"",
            self.key_id,
            self.algorithm.as_str()
        )
    }
}

/// How the code-signing and legacy signature paths combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// Every configured path must pass.
    #[default]
    RequireAll,

    /// A passing code signature is sufficient; the legacy path is skipped.
    CodeSigningSuffices,
}

/// Updates loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesConfig {
    /// Manifest endpoint.
    #[serde(default)]
    pub update_url: String,

    /// Comma-separated list of accepted SDK versions.
    #[serde(default)]
    pub sdk_version: Option<String>,

    /// Runtime version; takes precedence over the SDK version header.
    #[serde(default)]
    pub runtime_version: Option<String>,

    /// Release channel.
    #[serde(default = "default_release_channel")]
    pub release_channel: String,

    /// Platform identifier sent with every request.
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Environment tag sent with every request.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Extra headers added to every request.
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,

    /// Whether manifests are expected to carry a legacy signature.
    #[serde(default)]
    pub expects_signed_manifest: bool,

    /// Code-signing trust configuration.
    #[serde(default)]
    pub code_signing: Option<CodeSigningConfig>,

    /// How the two signature paths combine.
    #[serde(default)]
    pub verification_policy: VerificationPolicy,

    /// Where the legacy manifest public key is published.
    #[serde(default = "default_public_key_url")]
    pub legacy_public_key_url: String,

    /// Connect and per-read timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_release_channel() -> String {
    "default".to_string()
}

fn default_platform() -> String {
    "android".to_string()
}

fn default_environment() -> String {
    "BARE".to_string()
}

fn default_public_key_url() -> String {
    "https://exp.host/--/manifest-public-key".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            update_url: String::new(),
            sdk_version: None,
            runtime_version: None,
            release_channel: default_release_channel(),
            platform: default_platform(),
            environment: default_environment(),
            request_headers: BTreeMap::new(),
            expects_signed_manifest: false,
            code_signing: None,
            verification_policy: VerificationPolicy::default(),
            legacy_public_key_url: default_public_key_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl UpdatesConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `UPDATES_URL` | Manifest endpoint |
    /// | `UPDATES_SDK_VERSION` | Accepted SDK versions (comma-separated) |
    /// | `UPDATES_RUNTIME_VERSION` | Runtime version |
    /// | `UPDATES_RELEASE_CHANNEL` | Release channel |
    /// | `UPDATES_EXPECTS_SIGNED_MANIFEST` | Expect legacy-signed manifests |
    /// | `UPDATES_TIMEOUT` | Connect and per-read timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            update_url: std::env::var("UPDATES_URL").unwrap_or_default(),
            sdk_version: std::env::var("UPDATES_SDK_VERSION").ok(),
            runtime_version: std::env::var("UPDATES_RUNTIME_VERSION").ok(),
            release_channel: std::env::var("UPDATES_RELEASE_CHANNEL")
                .unwrap_or_else(|_| default_release_channel()),
            expects_signed_manifest: std::env::var("UPDATES_EXPECTS_SIGNED_MANIFEST")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            timeout_secs: std::env::var("UPDATES_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            ..Self::default()
        }
    }

    /// Set the manifest endpoint.
    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = url.into();
        self
    }

    /// Set the accepted SDK versions.
    pub fn with_sdk_version(mut self, sdk_version: impl Into<String>) -> Self {
        self.sdk_version = Some(sdk_version.into());
        self
    }

    /// Set the runtime version.
    pub fn with_runtime_version(mut self, runtime_version: impl Into<String>) -> Self {
        self.runtime_version = Some(runtime_version.into());
        self
    }

    /// Set the release channel.
    pub fn with_release_channel(mut self, channel: impl Into<String>) -> Self {
        self.release_channel = channel.into();
        self
    }

    /// Add a header sent with every request.
    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Expect legacy-signed manifests.
    pub fn with_expects_signed_manifest(mut self, expects: bool) -> Self {
        self.expects_signed_manifest = expects;
        self
    }

    /// Enable the code-signing path.
    pub fn with_code_signing(mut self, code_signing: CodeSigningConfig) -> Self {
        self.code_signing = Some(code_signing);
        self
    }

    /// Set how the signature paths combine.
    pub fn with_verification_policy(mut self, policy: VerificationPolicy) -> Self {
        self.verification_policy = policy;
        self
    }

    /// Set the legacy public key location.
    pub fn with_legacy_public_key_url(mut self, url: impl Into<String>) -> Self {
        self.legacy_public_key_url = url.into();
        self
    }

    /// Whether `sdk_version` is one of the accepted SDK versions.
    pub fn accepts_sdk_version(&self, sdk_version: &str) -> bool {
        self.sdk_version
            .as_deref()
            .map(|accepted| accepted.split(',').any(|v| v.trim() == sdk_version))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_defaults() {
        let config = UpdatesConfig::default();
        assert_eq!(config.release_channel, "default");
        assert_eq!(config.platform, "android");
        assert_eq!(config.environment, "BARE");
        assert!(!config.expects_signed_manifest);
        assert!(config.code_signing.is_none());
        assert_eq!(config.verification_policy, VerificationPolicy::RequireAll);
    }

    #[test]
    fn test_config_builder() {
        let config = UpdatesConfig::default()
            .with_update_url("https://updates.example.com/manifest")
            .with_sdk_version("40.0.0,41.0.0")
            .with_request_header("x-app", "demo")
            .with_expects_signed_manifest(true);

        assert_eq!(config.update_url, "https://updates.example.com/manifest");
        assert_eq!(config.request_headers.get("x-app").map(String::as_str), Some("demo"));
        assert!(config.expects_signed_manifest);
    }

    #[test]
    fn test_accepts_sdk_version() {
        let config = UpdatesConfig::default().with_sdk_version("40,41");
        assert!(config.accepts_sdk_version("41"));
        assert!(!config.accepts_sdk_version("4"));
        assert!(!UpdatesConfig::default().accepts_sdk_version("41"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: UpdatesConfig = serde_json::from_str(
            r#"{"update_url": "https://u.example.com", "verification_policy": "code_signing_suffices"}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.verification_policy, VerificationPolicy::CodeSigningSuffices);
    }

    #[test]
    fn test_accept_signature_header() {
        let code_signing = CodeSigningConfig::new("pem").with_key_id("main");
        assert_eq!(
            code_signing.accept_signature_header(),
            "sig, keyid=\"main\", alg=\"rsa-v1_5-sha256\""
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("UPDATES_URL", "https://env.example.com/manifest");
        std::env::set_var("UPDATES_SDK_VERSION", "41.0.0");
        std::env::set_var("UPDATES_EXPECTS_SIGNED_MANIFEST", "true");
        std::env::set_var("UPDATES_TIMEOUT", "not-a-number");

        let config = UpdatesConfig::from_env();

        std::env::remove_var("UPDATES_URL");
        std::env::remove_var("UPDATES_SDK_VERSION");
        std::env::remove_var("UPDATES_EXPECTS_SIGNED_MANIFEST");
        std::env::remove_var("UPDATES_TIMEOUT");

        assert_eq!(config.update_url, "https://env.example.com/manifest");
        assert_eq!(config.sdk_version.as_deref(), Some("41.0.0"));
        assert!(config.expects_signed_manifest);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.release_channel, "default");
    }
}
