//! Canonical update manifests.

mod builder;
mod factory;
mod selection;

use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::error::{UpdatesError, UpdatesResult};
use crate::structured::parse_dictionary;
use crate::types::{AssetDescriptor, ManifestHeaderData};

pub use builder::{select_envelope, ManifestBuilder, ManifestEnvelope};
pub use factory::{DefaultManifestFactory, ManifestFactory};
pub use selection::{FilterSelectionPolicy, SelectionPolicy};

const DEFAULT_LAUNCH_EXTENSION: &str = ".bundle";

/// Manifest format, chosen from the protocol version header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// No protocol version: classic manifest with a `bundleUrl`.
    Legacy,
    /// Protocol version 0 or 1: `launchAsset` plus `assets`.
    New,
}

/// A verified, normalized manifest.
#[derive(Debug, Clone)]
pub struct UpdateManifest {
    kind: ManifestKind,
    raw: Map<String, Value>,
    is_verified: bool,
    header_data: ManifestHeaderData,
    extensions: Option<Map<String, Value>>,
    manifest_filters: Option<Map<String, Value>>,
    server_defined_headers: Option<Map<String, Value>>,
}

impl UpdateManifest {
    /// Assemble a manifest, parsing the structured header fields.
    pub fn new(
        kind: ManifestKind,
        raw: Map<String, Value>,
        is_verified: bool,
        header_data: ManifestHeaderData,
        extensions: Option<Map<String, Value>>,
    ) -> Self {
        let manifest_filters =
            parse_header_dictionary("expo-manifest-filters", header_data.manifest_filters.as_deref());
        let server_defined_headers = parse_header_dictionary(
            "expo-server-defined-headers",
            header_data.server_defined_headers.as_deref(),
        );

        Self {
            kind,
            raw,
            is_verified,
            header_data,
            extensions,
            manifest_filters,
            server_defined_headers,
        }
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    /// The manifest JSON object.
    pub fn raw_json(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    pub fn header_data(&self) -> &ManifestHeaderData {
        &self.header_data
    }

    pub fn extensions(&self) -> Option<&Map<String, Value>> {
        self.extensions.as_ref()
    }

    /// Parsed `expo-manifest-filters`.
    pub fn manifest_filters(&self) -> Option<&Map<String, Value>> {
        self.manifest_filters.as_ref()
    }

    /// Parsed `expo-server-defined-headers`.
    pub fn server_defined_headers(&self) -> Option<&Map<String, Value>> {
        self.server_defined_headers.as_ref()
    }

    /// Update id (`id`, or `releaseId` for legacy manifests).
    pub fn id(&self) -> Option<&str> {
        let id = self.raw.get("id").and_then(Value::as_str);
        match self.kind {
            ManifestKind::Legacy => id.or_else(|| self.raw.get("releaseId").and_then(Value::as_str)),
            ManifestKind::New => id,
        }
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.raw.get("metadata").and_then(Value::as_object)
    }

    /// Assets referenced by the manifest, launch asset first.
    ///
    /// Fails with `MalformedResponse` when an asset entry has no `key`.
    pub fn assets(&self) -> UpdatesResult<Vec<AssetDescriptor>> {
        match self.kind {
            ManifestKind::New => self.new_manifest_assets(),
            ManifestKind::Legacy => Ok(self.legacy_manifest_assets()),
        }
    }

    fn new_manifest_assets(&self) -> UpdatesResult<Vec<AssetDescriptor>> {
        let mut assets = Vec::new();

        if let Some(launch) = self.raw.get("launchAsset").and_then(Value::as_object) {
            let mut asset = self.asset_from_json(launch)?;
            asset.is_launch_asset = true;
            if asset.file_extension.is_none() {
                asset.file_extension = Some(DEFAULT_LAUNCH_EXTENSION.to_string());
            }
            assets.push(asset);
        }

        if let Some(entries) = self.raw.get("assets").and_then(Value::as_array) {
            for entry in entries.iter().filter_map(Value::as_object) {
                assets.push(self.asset_from_json(entry)?);
            }
        }

        Ok(assets)
    }

    fn legacy_manifest_assets(&self) -> Vec<AssetDescriptor> {
        let Some(bundle_url) = self.raw.get("bundleUrl").and_then(Value::as_str) else {
            return Vec::new();
        };
        let key = self
            .raw
            .get("bundleKey")
            .and_then(Value::as_str)
            .unwrap_or("bundle");

        let mut asset = AssetDescriptor::new(key, parse_url(key, bundle_url))
            .with_file_extension(DEFAULT_LAUNCH_EXTENSION);
        asset.is_launch_asset = true;
        vec![asset]
    }

    fn asset_from_json(&self, entry: &Map<String, Value>) -> UpdatesResult<AssetDescriptor> {
        let string = |name: &str| entry.get(name).and_then(Value::as_str).map(String::from);

        let key = string("key").ok_or_else(|| UpdatesError::malformed("asset entry has no key"))?;
        let url = string("url").and_then(|url| parse_url(&key, &url));

        let mut asset = AssetDescriptor::new(key, url);
        asset.expected_hash = string("hash");
        asset.file_extension = string("fileExtension");
        asset.content_type = string("contentType");

        if let Some(headers) = self.asset_request_headers(&asset.key) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    asset.extra_request_headers.insert(name.clone(), value.to_string());
                }
            }
        }

        Ok(asset)
    }

    fn asset_request_headers(&self, key: &str) -> Option<&Map<String, Value>> {
        self.extensions
            .as_ref()?
            .get("assetRequestHeaders")?
            .as_object()?
            .get(key)?
            .as_object()
    }
}

fn parse_url(key: &str, url: &str) -> Option<Url> {
    match Url::parse(url) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(asset = %key, error = %e, "ignoring invalid asset URL");
            None
        }
    }
}

/// Parse a structured dictionary header; malformed values count as absent.
fn parse_header_dictionary(name: &str, value: Option<&str>) -> Option<Map<String, Value>> {
    match parse_dictionary(value?) {
        Ok(dict) => Some(dict.to_json_object()),
        Err(e) => {
            warn!(header = %name, error = %e, "ignoring malformed structured header");
            None
        }
    }
}
