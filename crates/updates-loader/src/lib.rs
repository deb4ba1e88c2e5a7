//! Update manifest loader.
//!
//! This crate fetches an update manifest from an update server, authenticates
//! it and turns it into a normalized [`UpdateManifest`], providing:
//!
//! - Manifest requests with protocol headers and a single retry on transport failure
//! - Single-part and `multipart/mixed` response decoding
//! - Code-signing (`expo-signature`) and legacy key (`expo-manifest-signature`) verification
//! - Multi-manifest selection by SDK version and manifest filter checks
//! - Asset downloads with SHA-256 verification and atomic placement
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use updates_loader::{UpdatesClient, UpdatesConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdatesConfig::default()
//!     .with_update_url("https://updates.example.com/manifest")
//!     .with_runtime_version("1.0.0");
//! let client = UpdatesClient::new(config)?;
//!
//! let manifest = client.download_manifest(None, None).await?;
//! for asset in manifest.assets()? {
//!     let download = client.download_asset(&asset, Path::new("/var/lib/app/updates")).await?;
//!     println!("{} -> {:?}", download.asset.key, download.asset.relative_path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Verification
//!
//! With a [`CodeSigningConfig`], every manifest must carry a valid
//! `expo-signature` from the configured trust anchor. The legacy signature,
//! when present, is checked against a [`PublicKeyProvider`]; `UNSIGNED` or a
//! missing signature yields an unverified manifest rather than an error.
//! [`VerificationPolicy`] decides whether a code signature alone is enough.
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `UPDATES_URL` | Manifest endpoint |
//! | `UPDATES_SDK_VERSION` | Accepted SDK versions, comma-separated |
//! | `UPDATES_RUNTIME_VERSION` | Runtime version |
//! | `UPDATES_RELEASE_CHANNEL` | Release channel (default: `default`) |
//! | `UPDATES_EXPECTS_SIGNED_MANIFEST` | Expect legacy-signed manifests |
//! | `UPDATES_TIMEOUT` | Connect and per-read timeout in seconds (default: 30) |

pub mod asset;
pub mod client;
pub mod config;
pub mod error;
pub mod manifest;
pub mod multipart;
pub mod request;
pub mod response;
pub mod signature;
pub mod structured;
pub mod transport;
pub mod types;

// Re-export main types
pub use asset::AssetFetcher;
pub use client::UpdatesClient;
pub use config::{CodeSigningAlgorithm, CodeSigningConfig, UpdatesConfig, VerificationPolicy};
pub use error::{UpdatesError, UpdatesResult};
pub use manifest::{
    select_envelope, DefaultManifestFactory, FilterSelectionPolicy, ManifestBuilder,
    ManifestEnvelope, ManifestFactory, ManifestKind, SelectionPolicy, UpdateManifest,
};
pub use multipart::{read_manifest_parts, ManifestParts, MultipartReader, PartHeaders};
pub use response::parse_manifest_response;
pub use signature::{
    CodeSigningVerifier, PublicKeyProvider, RemotePublicKey, SignatureVerifier, StaticPublicKey,
    VerifiedManifest,
};
pub use transport::{
    Body, HttpRequest, HttpResponse, ReqwestTransport, RetryPolicy, RetryingFetcher, Transport,
};
pub use types::{
    AssetDescriptor, AssetDownload, ManifestHeaderData, RawManifestResponse, SignaturePresence,
};
