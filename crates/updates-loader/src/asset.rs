//! Asset downloads with hash verification.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::UpdatesConfig;
use crate::error::{UpdatesError, UpdatesResult};
use crate::request::asset_request;
use crate::transport::{Body, RetryingFetcher};
use crate::types::{AssetDescriptor, AssetDownload};

/// Downloads single assets into a destination directory.
///
/// Requests go through a [`RetryingFetcher`], so a transport failure is
/// retried like a manifest request.
#[derive(Clone)]
pub struct AssetFetcher {
    fetcher: RetryingFetcher,
}

impl AssetFetcher {
    pub fn new(fetcher: RetryingFetcher) -> Self {
        Self { fetcher }
    }

    /// Download `asset` into `destination_dir`, unless it is already there.
    ///
    /// The body is streamed to a temporary file and hashed on the way; the
    /// file is moved into place only once the hash checks out.
    pub async fn fetch_asset(
        &self,
        asset: &AssetDescriptor,
        destination_dir: &Path,
        config: &UpdatesConfig,
    ) -> UpdatesResult<AssetDownload> {
        if asset.url.is_none() {
            return Err(UpdatesError::MissingUrl {
                key: asset.key.clone(),
            });
        }

        let filename = checked_filename(asset)?;
        let destination = destination_dir.join(&filename);

        if fs::try_exists(&destination).await? {
            debug!(asset = %asset.key, path = %destination.display(), "asset already present");
            let mut existing = asset.clone();
            existing.relative_path = Some(filename);
            return Ok(AssetDownload {
                asset: existing,
                is_new: false,
            });
        }

        let request = asset_request(asset, config)?;
        debug!(asset = %asset.key, url = %request.url, "downloading asset");
        let response = self.fetcher.fetch(&request).await?;

        if !response.status.is_success() {
            let status = response.status.as_u16();
            let body = response.body.text().await.unwrap_or_default();
            return Err(UpdatesError::HttpStatus { status, body });
        }

        fs::create_dir_all(destination_dir).await?;
        let temp_path = temp_path_for(&destination);
        let hash = match write_hashed(response.body, &temp_path).await {
            Ok(hash) => hash,
            Err(e) => {
                remove_temp(&temp_path).await;
                return Err(e);
            }
        };

        let actual = URL_SAFE_NO_PAD.encode(&hash);
        if let Some(expected) = asset.expected_hash.as_deref() {
            if !expected.eq_ignore_ascii_case(&actual) {
                remove_temp(&temp_path).await;
                warn!(asset = %asset.key, expected = %expected, actual = %actual, "asset hash mismatch");
                return Err(UpdatesError::HashMismatch {
                    key: asset.key.clone(),
                    expected: expected.to_lowercase(),
                    actual,
                });
            }
        }

        if let Err(e) = fs::rename(&temp_path, &destination).await {
            remove_temp(&temp_path).await;
            return Err(UpdatesError::Io {
                message: format!("failed to move asset into place: {}", e),
            });
        }

        let mut downloaded = asset.clone();
        downloaded.relative_path = Some(filename);
        downloaded.download_time = Some(chrono::Utc::now());
        downloaded.hash = Some(hash);

        Ok(AssetDownload {
            asset: downloaded,
            is_new: true,
        })
    }
}

impl std::fmt::Debug for AssetFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetFetcher")
            .field("fetcher", &self.fetcher)
            .finish()
    }
}

/// The asset's on-disk name, which must be a single path component.
fn checked_filename(asset: &AssetDescriptor) -> UpdatesResult<String> {
    let filename = asset.filename();
    if asset.key.is_empty()
        || filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(UpdatesError::malformed(format!(
            "asset key {:?} is not a valid file name",
            filename
        )));
    }
    Ok(filename)
}

/// `<destination>.tmp`, next to the destination so the rename stays on one filesystem.
fn temp_path_for(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_owned();
    path.push(".tmp");
    PathBuf::from(path)
}

async fn write_hashed(body: Body, path: &Path) -> UpdatesResult<Vec<u8>> {
    let mut file = fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut stream = body.into_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk[..]);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(hasher.finalize().to_vec())
}

async fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temporary asset file");
        }
    }
}
