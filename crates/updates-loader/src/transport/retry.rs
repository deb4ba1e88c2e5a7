//! Single-retry fetch over a [`Transport`].
//!
//! Only transport failures are retried. Status codes are passed through
//! untouched; callers reject them.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::UpdatesResult;

/// How many times a request may be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Issues requests through an injected transport, retrying transport
/// failures according to its [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, re-issuing it verbatim after a transport failure.
    /// The last failure is returned unchanged once attempts run out.
    pub async fn fetch(&self, request: &HttpRequest) -> UpdatesResult<HttpResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(url = %request.url, attempt, "sending request");

            match self.transport.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        error = %e,
                        url = %request.url,
                        attempt,
                        max_attempts,
                        "retrying request"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
