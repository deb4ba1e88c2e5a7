//! Protocol types shared across the loader.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

pub const HEADER_PROTOCOL_VERSION: &str = "expo-protocol-version";
pub const HEADER_MANIFEST_FILTERS: &str = "expo-manifest-filters";
pub const HEADER_SERVER_DEFINED_HEADERS: &str = "expo-server-defined-headers";
pub const HEADER_MANIFEST_SIGNATURE: &str = "expo-manifest-signature";
pub const HEADER_SIGNATURE: &str = "expo-signature";

/// Sentinel some servers send in place of a legacy signature.
pub const UNSIGNED_SENTINEL: &str = "UNSIGNED";

/// Metadata accompanying a manifest body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHeaderData {
    /// `expo-protocol-version` header value.
    pub protocol_version: Option<String>,

    /// `expo-manifest-filters` header value (structured dictionary).
    pub manifest_filters: Option<String>,

    /// `expo-server-defined-headers` header value (structured dictionary).
    pub server_defined_headers: Option<String>,

    /// `expo-manifest-signature` header value (legacy signature).
    pub manifest_signature: Option<String>,

    /// `expo-signature` header value (code signing).
    pub signature: Option<String>,
}

impl ManifestHeaderData {
    /// Read every field from top-level response headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            protocol_version: header_string(headers, HEADER_PROTOCOL_VERSION),
            manifest_filters: header_string(headers, HEADER_MANIFEST_FILTERS),
            server_defined_headers: header_string(headers, HEADER_SERVER_DEFINED_HEADERS),
            manifest_signature: header_string(headers, HEADER_MANIFEST_SIGNATURE),
            signature: header_string(headers, HEADER_SIGNATURE),
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Whether, and how, a legacy signature was supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignaturePresence {
    /// No signature value at all.
    Absent,
    /// The server sent the `UNSIGNED` sentinel.
    ExplicitlyUnsigned,
    /// A signature to verify.
    Signed(String),
}

impl SignaturePresence {
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            None => Self::Absent,
            Some(UNSIGNED_SENTINEL) => Self::ExplicitlyUnsigned,
            Some(signature) => Self::Signed(signature.to_string()),
        }
    }
}

/// A manifest response as received, before verification.
#[derive(Debug, Clone)]
pub struct RawManifestResponse {
    /// Manifest body (whole response, or the `manifest` part).
    pub body: String,

    /// Header metadata.
    pub header_data: ManifestHeaderData,

    /// Parsed `extensions` part, if any.
    pub extensions: Option<Map<String, Value>>,
}

/// A binary asset referenced by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Unique key within the manifest.
    pub key: String,

    /// Source URL.
    #[serde(default)]
    pub url: Option<Url>,

    /// Expected hash (unpadded URL-safe base64 of the SHA-256 digest).
    #[serde(default)]
    pub expected_hash: Option<String>,

    /// Extra headers sent when downloading this asset.
    #[serde(default)]
    pub extra_request_headers: BTreeMap<String, String>,

    /// File extension, with or without the leading dot.
    #[serde(default)]
    pub file_extension: Option<String>,

    /// Declared content type.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Whether this is the asset the application launches from.
    #[serde(default)]
    pub is_launch_asset: bool,

    /// Path relative to the destination directory, set once downloaded.
    #[serde(default)]
    pub relative_path: Option<String>,

    /// When the asset was downloaded.
    #[serde(default)]
    pub download_time: Option<DateTime<Utc>>,

    /// SHA-256 digest of the downloaded content.
    #[serde(default)]
    pub hash: Option<Vec<u8>>,
}

impl AssetDescriptor {
    pub fn new(key: impl Into<String>, url: Option<Url>) -> Self {
        Self {
            key: key.into(),
            url,
            ..Self::default()
        }
    }

    /// Set the expected hash.
    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    /// Set the file extension.
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = Some(extension.into());
        self
    }

    /// Add a per-asset request header.
    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_request_headers.insert(name.into(), value.into());
        self
    }

    /// Deterministic on-disk name: key plus dotted extension.
    pub fn filename(&self) -> String {
        match self.file_extension.as_deref() {
            Some(ext) if !ext.is_empty() => {
                if ext.starts_with('.') {
                    format!("{}{}", self.key, ext)
                } else {
                    format!("{}.{}", self.key, ext)
                }
            }
            _ => self.key.clone(),
        }
    }
}

/// Outcome of an asset download.
#[derive(Debug, Clone)]
pub struct AssetDownload {
    /// Descriptor with the post-download fields set.
    pub asset: AssetDescriptor,

    /// False when the file already existed and no request was made.
    pub is_new: bool,
}
