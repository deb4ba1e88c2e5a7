//! HTTP transport seam.
//!
//! The loader never talks to `reqwest` directly; it goes through
//! [`Transport`] so the retry and parsing layers can be exercised with
//! scripted transports. [`ReqwestTransport`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{UpdatesError, UpdatesResult};

mod retry;

pub use retry::{RetryPolicy, RetryingFetcher};

const USER_AGENT_VALUE: &str = concat!("updates-loader/", env!("CARGO_PKG_VERSION"));

/// An outgoing request. Cloneable so it can be re-issued verbatim.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> UpdatesResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| UpdatesError::config(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            UpdatesError::config(format!("invalid value for header {}: {}", name, e))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Streaming response body.
pub struct Body {
    stream: BoxStream<'static, UpdatesResult<Bytes>>,
}

impl Body {
    pub fn from_stream(stream: BoxStream<'static, UpdatesResult<Bytes>>) -> Self {
        Self { stream }
    }

    pub fn empty() -> Self {
        Self::from_stream(stream::empty().boxed())
    }

    pub fn into_stream(self) -> BoxStream<'static, UpdatesResult<Bytes>> {
        self.stream
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> UpdatesResult<Vec<u8>> {
        self.stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }

    /// Collect the whole body as UTF-8 text.
    pub async fn text(self) -> UpdatesResult<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes)
            .map_err(|e| UpdatesError::malformed(format!("response body is not UTF-8: {}", e)))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_stream(stream::once(async move { Ok(Bytes::from(bytes)) }).boxed())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(text.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Body { .. }")
    }
}

/// A received response. Any status is a successful exchange at this layer.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Executes requests. Implementations return `UpdatesError::Transport` for
/// connection, timeout and I/O failures and never inspect status codes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> UpdatesResult<HttpResponse>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` bounds connecting and each individual read, not the whole
    /// exchange, so a slow body that keeps arriving is not cut off.
    pub fn new(timeout: Duration) -> UpdatesResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| UpdatesError::Transport {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> UpdatesResult<HttpResponse> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = Body::from_stream(response.bytes_stream().map_err(UpdatesError::from).boxed());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
