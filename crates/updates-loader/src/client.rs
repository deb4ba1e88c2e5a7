//! Client facade: fetch, parse, verify and build in one call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::asset::AssetFetcher;
use crate::config::UpdatesConfig;
use crate::error::{UpdatesError, UpdatesResult};
use crate::manifest::{select_envelope, ManifestBuilder, ManifestFactory, SelectionPolicy, UpdateManifest};
use crate::request::manifest_request;
use crate::response::parse_manifest_response;
use crate::signature::{PublicKeyProvider, RemotePublicKey, SignatureVerifier};
use crate::transport::{ReqwestTransport, RetryPolicy, RetryingFetcher, Transport};
use crate::types::{AssetDescriptor, AssetDownload};

/// Loads update manifests and their assets.
#[derive(Clone)]
pub struct UpdatesClient {
    /// Configuration.
    config: UpdatesConfig,

    /// Shared HTTP transport.
    transport: Arc<dyn Transport>,

    /// Manifest and asset fetcher (single retry).
    fetcher: RetryingFetcher,

    /// Signature checks.
    verifier: SignatureVerifier,

    /// Manifest normalization.
    builder: ManifestBuilder,

    /// Asset downloads.
    assets: AssetFetcher,
}

impl UpdatesClient {
    /// Create a client backed by `reqwest`.
    pub fn new(config: UpdatesConfig) -> UpdatesResult<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client from environment variables.
    pub fn from_env() -> UpdatesResult<Self> {
        Self::new(UpdatesConfig::from_env())
    }

    /// Create a client over a custom transport.
    ///
    /// The legacy public key is fetched from `legacy_public_key_url` on
    /// first use unless a provider is supplied with
    /// [`with_public_key_provider`](Self::with_public_key_provider).
    pub fn with_transport(config: UpdatesConfig, transport: Arc<dyn Transport>) -> UpdatesResult<Self> {
        let fetcher = RetryingFetcher::new(transport.clone());
        let public_keys = RemotePublicKey::new(fetcher.clone(), &config.legacy_public_key_url)?;
        let verifier = SignatureVerifier::new(&config, Arc::new(public_keys))?;

        Ok(Self {
            config,
            transport,
            fetcher: fetcher.clone(),
            verifier,
            builder: ManifestBuilder::default(),
            assets: AssetFetcher::new(fetcher),
        })
    }

    /// Use `provider` for legacy signature keys.
    pub fn with_public_key_provider(mut self, provider: Arc<dyn PublicKeyProvider>) -> Self {
        self.verifier = self.verifier.with_public_keys(provider);
        self
    }

    /// Use a custom manifest factory.
    pub fn with_manifest_factory(mut self, factory: Arc<dyn ManifestFactory>) -> Self {
        self.builder = self.builder.with_factory(factory);
        self
    }

    /// Use a custom filter selection policy.
    pub fn with_selection_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.builder = self.builder.with_policy(policy);
        self
    }

    /// Change how often manifest and asset requests are attempted.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.fetcher = RetryingFetcher::with_policy(self.transport.clone(), policy);
        self.assets = AssetFetcher::new(self.fetcher.clone());
        self
    }

    pub fn config(&self) -> &UpdatesConfig {
        &self.config
    }

    /// Download, verify and normalize the manifest.
    ///
    /// `extra_headers` are sent first and cannot override protocol headers.
    /// `previous_fatal_error` is reported to the server, truncated.
    pub async fn download_manifest(
        &self,
        extra_headers: Option<&Map<String, Value>>,
        previous_fatal_error: Option<&str>,
    ) -> UpdatesResult<UpdateManifest> {
        let request = manifest_request(&self.config, extra_headers, previous_fatal_error)?;
        debug!(url = %request.url, "fetching manifest");

        let response = self.fetcher.fetch(&request).await?;
        if !response.status.is_success() {
            let status = response.status.as_u16();
            let body = response.body.text().await.unwrap_or_default();
            return Err(UpdatesError::HttpStatus { status, body });
        }

        let raw = parse_manifest_response(response).await?;
        let envelope = select_envelope(&raw.body, &self.config)?;
        let verified = self.verifier.verify(&raw, envelope).await?;
        let manifest = self
            .builder
            .build_from_response(verified, raw, &self.config)?;

        info!(
            id = manifest.id().unwrap_or("<none>"),
            verified = manifest.is_verified(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Download one asset into `destination_dir`.
    pub async fn download_asset(
        &self,
        asset: &AssetDescriptor,
        destination_dir: &Path,
    ) -> UpdatesResult<AssetDownload> {
        self.assets
            .fetch_asset(asset, destination_dir, &self.config)
            .await
    }
}

impl std::fmt::Debug for UpdatesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatesClient")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}
