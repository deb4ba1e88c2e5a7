//! Manifest authenticity checks.
//!
//! Two independent paths:
//! - **Code signing**: `expo-signature` over the raw body, checked against a
//!   configured trust anchor.
//! - **Legacy key**: RSA signature over the manifest string, either embedded
//!   in the body (`manifestString`/`signature`) or sent in
//!   `expo-manifest-signature`, checked against a [`PublicKeyProvider`].
//!
//! An absent or `UNSIGNED` legacy signature leaves the manifest unverified;
//! a present but wrong one is an error.

mod code_signing;
mod legacy;

use std::sync::Arc;

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{UpdatesConfig, VerificationPolicy};
use crate::error::{UpdatesError, UpdatesResult};
use crate::types::{RawManifestResponse, SignaturePresence};

pub use code_signing::{parse_signature_header, CodeSigningVerifier, SignatureHeader};
pub use legacy::{verify_legacy_signature, PublicKeyProvider, RemotePublicKey, StaticPublicKey};

/// Manifest object that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedManifest {
    pub manifest: Map<String, Value>,
    /// True only when a legacy signature (or, under
    /// [`VerificationPolicy::CodeSigningSuffices`], a code signature) checked out.
    pub is_verified: bool,
}

/// Where the legacy signature and the signed bytes come from.
#[derive(Debug)]
struct LegacyEnvelope {
    manifest: Map<String, Value>,
    signed_data: String,
    signature: SignaturePresence,
}

impl LegacyEnvelope {
    fn from_envelope(
        envelope: Map<String, Value>,
        raw: &RawManifestResponse,
    ) -> UpdatesResult<Self> {
        let embedded = match (envelope.get("manifestString"), envelope.get("signature")) {
            (Some(Value::String(manifest_string)), Some(Value::String(signature))) => {
                Some((manifest_string.clone(), signature.clone()))
            }
            _ => None,
        };

        match embedded {
            Some((manifest_string, signature)) => {
                let manifest = serde_json::from_str::<Map<String, Value>>(&manifest_string)
                    .map_err(|e| {
                        UpdatesError::malformed(format!(
                            "failed to parse manifestString as a JSON object: {}",
                            e
                        ))
                    })?;
                Ok(Self {
                    manifest,
                    signed_data: manifest_string,
                    signature: SignaturePresence::from_value(Some(&signature)),
                })
            }
            None => Ok(Self {
                manifest: envelope,
                signed_data: raw.body.clone(),
                signature: SignaturePresence::from_value(
                    raw.header_data.manifest_signature.as_deref(),
                ),
            }),
        }
    }
}

/// Runs the configured verification paths over a selected envelope.
#[derive(Clone)]
pub struct SignatureVerifier {
    code_signing: Option<CodeSigningVerifier>,
    public_keys: Arc<dyn PublicKeyProvider>,
    policy: VerificationPolicy,
}

impl SignatureVerifier {
    pub fn new(config: &UpdatesConfig, public_keys: Arc<dyn PublicKeyProvider>) -> UpdatesResult<Self> {
        let code_signing = config
            .code_signing
            .clone()
            .map(CodeSigningVerifier::new)
            .transpose()?;

        Ok(Self {
            code_signing,
            public_keys,
            policy: config.verification_policy,
        })
    }

    /// Replace the legacy key source.
    pub fn with_public_keys(mut self, public_keys: Arc<dyn PublicKeyProvider>) -> Self {
        self.public_keys = public_keys;
        self
    }

    /// Verify `envelope`, the object selected from `raw.body`.
    pub async fn verify(
        &self,
        raw: &RawManifestResponse,
        envelope: Map<String, Value>,
    ) -> UpdatesResult<VerifiedManifest> {
        let code_signed = match &self.code_signing {
            Some(verifier) => {
                verifier.verify(raw.header_data.signature.as_deref(), raw.body.as_bytes())?;
                true
            }
            None => false,
        };

        let legacy = LegacyEnvelope::from_envelope(envelope, raw)?;

        if code_signed && self.policy == VerificationPolicy::CodeSigningSuffices {
            debug!("code signature accepted, skipping legacy signature check");
            return Ok(VerifiedManifest {
                manifest: legacy.manifest,
                is_verified: true,
            });
        }

        let is_verified = match &legacy.signature {
            SignaturePresence::Signed(signature) => {
                let valid =
                    verify_legacy_signature(self.public_keys.as_ref(), &legacy.signed_data, signature)
                        .await?;
                if !valid {
                    warn!("manifest signature mismatch");
                    return Err(UpdatesError::signature_invalid(
                        "manifest verification failed",
                    ));
                }
                true
            }
            SignaturePresence::ExplicitlyUnsigned => {
                debug!("manifest explicitly unsigned");
                false
            }
            SignaturePresence::Absent => false,
        };

        Ok(VerifiedManifest {
            manifest: legacy.manifest,
            is_verified,
        })
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("code_signing", &self.code_signing.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

/// RSASSA-PKCS1-v1_5 / SHA-256. `Ok(false)` on mismatch, error only when
/// the signature bytes are not a signature at all.
pub(crate) fn verify_rsa_sha256(
    key: &RsaPublicKey,
    data: &[u8],
    signature: &[u8],
) -> UpdatesResult<bool> {
    let signature = Signature::try_from(signature)
        .map_err(|e| UpdatesError::signature_invalid(format!("invalid signature encoding: {}", e)))?;
    let verifying_key = VerifyingKey::<Sha256>::new(key.clone());
    Ok(verifying_key.verify(data, &signature).is_ok())
}
