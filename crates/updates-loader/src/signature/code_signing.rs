//! Code-signing path: `expo-signature` header checked against the configured
//! trust anchor.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::RsaPublicKey;
use tracing::debug;

use crate::config::{CodeSigningAlgorithm, CodeSigningConfig};
use crate::error::{UpdatesError, UpdatesResult};
use crate::structured::{parse_dictionary, Item};

use super::verify_rsa_sha256;

const DEFAULT_KEY_ID: &str = "root";

/// Parsed `expo-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Base64 signature bytes.
    pub signature: String,
    pub key_id: String,
    pub algorithm: String,
}

/// Parse the `expo-signature` structured header.
///
/// `keyid` and `alg` fall back to `root` and `rsa-v1_5-sha256`.
pub fn parse_signature_header(value: Option<&str>) -> UpdatesResult<SignatureHeader> {
    let value = value.ok_or_else(|| {
        UpdatesError::signature_invalid("no expo-signature header specified")
    })?;

    let dict = parse_dictionary(value).map_err(|e| {
        UpdatesError::signature_invalid(format!("invalid expo-signature header: {}", e))
    })?;

    let signature = dict
        .get("sig")
        .and_then(Item::as_str)
        .ok_or_else(|| UpdatesError::signature_invalid("no signature in expo-signature header"))?
        .to_string();

    Ok(SignatureHeader {
        signature,
        key_id: dict
            .get("keyid")
            .and_then(Item::as_str)
            .unwrap_or(DEFAULT_KEY_ID)
            .to_string(),
        algorithm: dict
            .get("alg")
            .and_then(Item::as_str)
            .unwrap_or(CodeSigningAlgorithm::default().as_str())
            .to_string(),
    })
}

/// Verifies manifest bodies against a code-signing configuration.
#[derive(Debug, Clone)]
pub struct CodeSigningVerifier {
    config: CodeSigningConfig,
    trust_anchor: RsaPublicKey,
}

impl CodeSigningVerifier {
    pub fn new(config: CodeSigningConfig) -> UpdatesResult<Self> {
        let trust_anchor = config.public_key()?;
        Ok(Self {
            config,
            trust_anchor,
        })
    }

    /// Check `header` (the raw `expo-signature` value) over `body`.
    pub fn verify(&self, header: Option<&str>, body: &[u8]) -> UpdatesResult<()> {
        let header = parse_signature_header(header)?;

        if header.key_id != self.config.key_id {
            return Err(UpdatesError::signature_invalid(format!(
                "key with keyid={} from signature not found in client configuration",
                header.key_id
            )));
        }

        match CodeSigningAlgorithm::parse(&header.algorithm) {
            Some(alg) if alg == self.config.algorithm => {}
            _ => {
                return Err(UpdatesError::signature_invalid(format!(
                    "signature algorithm {} does not match configured algorithm {}",
                    header.algorithm,
                    self.config.algorithm.as_str()
                )))
            }
        }

        let signature = BASE64.decode(&header.signature).map_err(|e| {
            UpdatesError::signature_invalid(format!("invalid base64 signature: {}", e))
        })?;

        if !verify_rsa_sha256(&self.trust_anchor, body, &signature)? {
            return Err(UpdatesError::signature_invalid(
                "manifest download was successful, but signature was incorrect",
            ));
        }

        debug!(key_id = %header.key_id, "code signature verified");
        Ok(())
    }
}
