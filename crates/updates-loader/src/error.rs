//! Error types for the updates loader.

/// Errors surfaced by manifest and asset loading.
#[derive(Debug, thiserror::Error)]
pub enum UpdatesError {
    /// Connection, timeout or I/O failure talking to the update host.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The update host answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response could not be decoded as a manifest.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// Signature verification failed or could not be completed.
    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    /// No manifest candidate matches the accepted SDK versions.
    #[error("no compatible manifest found; SDK versions supported: {accepted}; provided manifest: {body}")]
    Incompatible { accepted: String, body: String },

    /// The manifest declares filters that do not match its own content.
    #[error("manifest is invalid: {message}")]
    FilterMismatch { message: String },

    /// Downloaded asset content does not hash to the declared value.
    #[error("asset hash invalid: {key}; expectedHash: {expected}; actualHash: {actual}")]
    HashMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Asset descriptor has no source URL.
    #[error("could not download asset {key} with no URL")]
    MissingUrl { key: String },

    /// Filesystem failure while placing an asset.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl UpdatesError {
    /// Whether the error is retryable at the transport layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub(crate) fn signature_invalid(reason: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for UpdatesError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: error_chain(&err),
        }
    }
}

/// `err` followed by each distinct cause in its source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

impl From<std::io::Error> for UpdatesError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for updates operations.
pub type UpdatesResult<T> = Result<T, UpdatesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(UpdatesError::Transport {
            message: "connection reset".to_string()
        }
        .is_retryable());
        assert!(!UpdatesError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!UpdatesError::malformed("bad").is_retryable());
    }

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("error decoding response body")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_includes_causes() {
        let err = Wrapped(std::io::Error::new(std::io::ErrorKind::TimedOut, "operation timed out"));
        assert_eq!(
            error_chain(&err),
            "error decoding response body: operation timed out"
        );
    }

    #[tokio::test]
    async fn reqwest_error_keeps_cause() {
        // Nothing listens on port 1.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let top = err.to_string();

        let UpdatesError::Transport { message } = UpdatesError::from(err) else {
            panic!("expected transport error");
        };
        assert!(message.starts_with(&top));
        assert!(message.len() > top.len(), "no cause in {:?}", message);
    }

    #[test]
    fn hash_mismatch_message_names_both_hashes() {
        let err = UpdatesError::HashMismatch {
            key: "bundle".to_string(),
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("expectedHash: abc"));
        assert!(text.contains("actualHash: def"));
    }
}
