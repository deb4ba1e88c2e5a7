//! Manifest construction by protocol version.

use serde_json::{Map, Value};

use crate::config::UpdatesConfig;
use crate::error::{UpdatesError, UpdatesResult};
use crate::types::ManifestHeaderData;

use super::{ManifestKind, UpdateManifest};

/// Turns a verified manifest object into an [`UpdateManifest`].
pub trait ManifestFactory: Send + Sync {
    fn create(
        &self,
        manifest: Map<String, Value>,
        is_verified: bool,
        header_data: ManifestHeaderData,
        extensions: Option<Map<String, Value>>,
        config: &UpdatesConfig,
    ) -> UpdatesResult<UpdateManifest>;
}

/// Picks the manifest kind from `expo-protocol-version`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultManifestFactory;

impl DefaultManifestFactory {
    pub fn kind_for(protocol_version: Option<&str>) -> UpdatesResult<ManifestKind> {
        match protocol_version.map(str::trim) {
            None => Ok(ManifestKind::Legacy),
            Some("0") | Some("1") => Ok(ManifestKind::New),
            Some(other) => Err(UpdatesError::malformed(format!(
                "unsupported protocol version: {}",
                other
            ))),
        }
    }
}

impl ManifestFactory for DefaultManifestFactory {
    fn create(
        &self,
        manifest: Map<String, Value>,
        is_verified: bool,
        header_data: ManifestHeaderData,
        extensions: Option<Map<String, Value>>,
        _config: &UpdatesConfig,
    ) -> UpdatesResult<UpdateManifest> {
        let kind = Self::kind_for(header_data.protocol_version.as_deref())?;
        Ok(UpdateManifest::new(
            kind,
            manifest,
            is_verified,
            header_data,
            extensions,
        ))
    }
}
