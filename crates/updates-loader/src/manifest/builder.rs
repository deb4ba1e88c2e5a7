//! Envelope selection and manifest assembly.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::UpdatesConfig;
use crate::error::{UpdatesError, UpdatesResult};
use crate::signature::VerifiedManifest;
use crate::types::{ManifestHeaderData, RawManifestResponse};

use super::{DefaultManifestFactory, FilterSelectionPolicy, ManifestFactory, SelectionPolicy, UpdateManifest};

/// Top-level shape of a manifest body.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEnvelope {
    /// A single manifest (or signed wrapper) object.
    Single(Map<String, Value>),
    /// Candidate manifests, one per SDK version.
    Candidates(Vec<Value>),
}

impl ManifestEnvelope {
    /// Parse a body as an object, falling back to an array.
    pub fn parse(body: &str) -> UpdatesResult<Self> {
        if let Ok(object) = serde_json::from_str::<Map<String, Value>>(body) {
            return Ok(Self::Single(object));
        }

        serde_json::from_str::<Vec<Value>>(body)
            .map(Self::Candidates)
            .map_err(|e| {
                UpdatesError::malformed(format!(
                    "manifest should be a valid JSON object or array: {}; body: {}",
                    e, body
                ))
            })
    }

    /// Reduce to one object; candidates are matched on `sdkVersion`.
    pub fn select(self, config: &UpdatesConfig, body: &str) -> UpdatesResult<Map<String, Value>> {
        match self {
            Self::Single(object) => Ok(object),
            Self::Candidates(candidates) => candidates
                .into_iter()
                .filter_map(|candidate| match candidate {
                    Value::Object(object) => Some(object),
                    _ => None,
                })
                .find(|object| {
                    object
                        .get("sdkVersion")
                        .and_then(Value::as_str)
                        .map(|version| config.accepts_sdk_version(version))
                        .unwrap_or(false)
                })
                .ok_or_else(|| UpdatesError::Incompatible {
                    accepted: config.sdk_version.clone().unwrap_or_default(),
                    body: body.to_string(),
                }),
        }
    }
}

/// Parse `body` and select the object to verify.
pub fn select_envelope(body: &str, config: &UpdatesConfig) -> UpdatesResult<Map<String, Value>> {
    ManifestEnvelope::parse(body)?.select(config, body)
}

/// Turns verified manifest objects into [`UpdateManifest`]s.
#[derive(Clone)]
pub struct ManifestBuilder {
    factory: Arc<dyn ManifestFactory>,
    policy: Arc<dyn SelectionPolicy>,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new(Arc::new(DefaultManifestFactory), Arc::new(FilterSelectionPolicy))
    }
}

impl ManifestBuilder {
    pub fn new(factory: Arc<dyn ManifestFactory>, policy: Arc<dyn SelectionPolicy>) -> Self {
        Self { factory, policy }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ManifestFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Build the manifest and check it against its declared filters.
    pub fn build(
        &self,
        verified: VerifiedManifest,
        header_data: ManifestHeaderData,
        extensions: Option<Map<String, Value>>,
        config: &UpdatesConfig,
    ) -> UpdatesResult<UpdateManifest> {
        let VerifiedManifest {
            mut manifest,
            is_verified,
        } = verified;

        if config.expects_signed_manifest {
            manifest.insert("isVerified".to_string(), Value::Bool(is_verified));
        }

        let manifest = self
            .factory
            .create(manifest, is_verified, header_data, extensions, config)?;

        if !self
            .policy
            .matches_filters(&manifest, manifest.manifest_filters())
        {
            return Err(UpdatesError::FilterMismatch {
                message: "manifest download was successful, but the manifest provides filters that do not match its content".to_string(),
            });
        }

        debug!(
            id = manifest.id().unwrap_or("<none>"),
            verified = manifest.is_verified(),
            "manifest built"
        );
        Ok(manifest)
    }

    /// Build from a parsed response. Convenience for callers that already
    /// hold the [`RawManifestResponse`].
    pub fn build_from_response(
        &self,
        verified: VerifiedManifest,
        raw: RawManifestResponse,
        config: &UpdatesConfig,
    ) -> UpdatesResult<UpdateManifest> {
        self.build(verified, raw.header_data, raw.extensions, config)
    }
}

impl std::fmt::Debug for ManifestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestBuilder").finish_non_exhaustive()
    }
}
