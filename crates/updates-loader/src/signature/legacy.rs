//! Legacy key path: RSA signature over the manifest string, checked against
//! a published public key.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::{UpdatesError, UpdatesResult};
use crate::transport::{HttpRequest, RetryingFetcher};

use super::verify_rsa_sha256;

/// Supplies the public key legacy manifest signatures are checked against.
#[async_trait]
pub trait PublicKeyProvider: Send + Sync {
    async fn public_key(&self) -> UpdatesResult<RsaPublicKey>;
}

/// A key known up front.
#[derive(Debug, Clone)]
pub struct StaticPublicKey {
    key: RsaPublicKey,
}

impl StaticPublicKey {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    pub fn from_pem(pem: &str) -> UpdatesResult<Self> {
        Ok(Self::new(decode_public_key(pem)?))
    }
}

#[async_trait]
impl PublicKeyProvider for StaticPublicKey {
    async fn public_key(&self) -> UpdatesResult<RsaPublicKey> {
        Ok(self.key.clone())
    }
}

/// A key fetched from the update host, cached after the first success.
#[derive(Debug, Clone)]
pub struct RemotePublicKey {
    fetcher: RetryingFetcher,
    url: Url,
    cached: Arc<RwLock<Option<RsaPublicKey>>>,
}

impl RemotePublicKey {
    pub fn new(fetcher: RetryingFetcher, url: &str) -> UpdatesResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| UpdatesError::config(format!("invalid public key URL {:?}: {}", url, e)))?;
        Ok(Self {
            fetcher,
            url,
            cached: Arc::new(RwLock::new(None)),
        })
    }

    async fn fetch(&self) -> UpdatesResult<RsaPublicKey> {
        debug!(url = %self.url, "fetching manifest public key");
        let response = self.fetcher.fetch(&HttpRequest::get(self.url.clone())).await?;

        if !response.status.is_success() {
            let status = response.status.as_u16();
            let body = response.body.text().await.unwrap_or_default();
            return Err(UpdatesError::HttpStatus { status, body });
        }

        decode_public_key(&response.body.text().await?)
    }
}

#[async_trait]
impl PublicKeyProvider for RemotePublicKey {
    async fn public_key(&self) -> UpdatesResult<RsaPublicKey> {
        if let Some(key) = self.cached.read().await.as_ref() {
            return Ok(key.clone());
        }

        let key = self.fetch().await?;
        *self.cached.write().await = Some(key.clone());
        Ok(key)
    }
}

fn decode_public_key(pem: &str) -> UpdatesResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| UpdatesError::malformed(format!("invalid manifest public key: {}", e)))
}

/// Verify a base64 RSA/SHA-256 signature over `data`.
///
/// Failing to obtain the key is reported as a verification failure; a
/// well-formed but wrong signature yields `Ok(false)`.
pub async fn verify_legacy_signature(
    provider: &dyn PublicKeyProvider,
    data: &str,
    signature_b64: &str,
) -> UpdatesResult<bool> {
    let key = provider.public_key().await.map_err(|e| {
        UpdatesError::signature_invalid(format!("could not validate signed manifest: {}", e))
    })?;

    let signature = BASE64.decode(signature_b64.trim()).map_err(|e| {
        UpdatesError::signature_invalid(format!("invalid base64 signature: {}", e))
    })?;

    verify_rsa_sha256(&key, data.as_bytes(), &signature)
}
