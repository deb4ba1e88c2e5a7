//! Streaming `multipart/*` decoder.
//!
//! Reads parts off a chunked body without buffering the whole response.
//! Every part body is consumed in full before the next boundary is looked
//! for, whether or not the caller wants it.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{UpdatesError, UpdatesResult};
use crate::structured;

const CRLF: &[u8] = b"\r\n";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Part header blocks larger than this are rejected.
pub const MAX_HEADER_SIZE: usize = 10 * 1024;

/// Headers of one part, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: HashMap<String, String>,
}

impl PartHeaders {
    /// Parse a raw header block: lines split on CRLF, each split at the
    /// first colon. Lines without a colon are skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.split("\r\n") {
            if let Some((name, value)) = line.split_once(':') {
                entries.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `name` parameter of the `content-disposition` header.
    pub fn disposition_name(&self) -> Option<String> {
        self.get("content-disposition")
            .and_then(|value| structured::parameter(value, ';', "name"))
    }
}

/// Low-level reader over a multipart byte stream.
pub struct MultipartReader {
    stream: BoxStream<'static, UpdatesResult<Bytes>>,
    buf: BytesMut,
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    eof: bool,
}

impl MultipartReader {
    pub fn new(stream: BoxStream<'static, UpdatesResult<Bytes>>, boundary: &str) -> Self {
        let dash_boundary = [b"--".as_slice(), boundary.as_bytes()].concat();
        let delimiter = [CRLF, dash_boundary.as_slice()].concat();
        Self {
            stream,
            buf: BytesMut::new(),
            dash_boundary,
            delimiter,
            eof: false,
        }
    }

    /// Pull one more chunk into the buffer. Returns false at end of stream.
    async fn fill(&mut self) -> UpdatesResult<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.stream.next().await {
            Some(chunk) => {
                self.buf.extend_from_slice(&chunk?);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    async fn ensure(&mut self, len: usize) -> UpdatesResult<bool> {
        while self.buf.len() < len {
            if !self.fill().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Discard everything up to and including the first boundary, then
    /// report whether a part follows.
    pub async fn skip_preamble(&mut self) -> UpdatesResult<bool> {
        let mut scanned = 0;
        loop {
            if self.buf.starts_with(&self.dash_boundary) {
                self.buf.advance(self.dash_boundary.len());
                return self.read_boundary().await;
            }
            if let Some(pos) = find(&self.buf, &self.delimiter, scanned) {
                self.buf.advance(pos + self.delimiter.len());
                return self.read_boundary().await;
            }
            scanned = self.buf.len().saturating_sub(self.delimiter.len());
            if !self.fill().await? {
                return Ok(false);
            }
        }
    }

    /// Read what follows a boundary: CRLF means another part, `--` closes.
    pub async fn read_boundary(&mut self) -> UpdatesResult<bool> {
        loop {
            if !self.ensure(1).await? {
                return Err(UpdatesError::malformed("stream ended after boundary"));
            }
            if matches!(self.buf[0], b' ' | b'\t') {
                self.buf.advance(1);
            } else {
                break;
            }
        }
        if !self.ensure(2).await? {
            return Err(UpdatesError::malformed("stream ended after boundary"));
        }
        match &self.buf[..2] {
            b"\r\n" => {
                self.buf.advance(2);
                Ok(true)
            }
            b"--" => {
                self.buf.advance(2);
                Ok(false)
            }
            _ => Err(UpdatesError::malformed("unexpected characters after boundary")),
        }
    }

    /// Read a part's raw header block.
    pub async fn read_headers(&mut self) -> UpdatesResult<String> {
        if !self.ensure(2).await? {
            return Err(UpdatesError::malformed("stream ended in part headers"));
        }
        if self.buf.starts_with(CRLF) {
            self.buf.advance(2);
            return Ok(String::new());
        }

        let mut scanned = 0;
        loop {
            if let Some(pos) = find(&self.buf, HEADER_SEPARATOR, scanned) {
                if pos > MAX_HEADER_SIZE {
                    return Err(header_too_large());
                }
                let block = self.buf.split_to(pos);
                self.buf.advance(HEADER_SEPARATOR.len());
                return String::from_utf8(block.to_vec())
                    .map_err(|e| UpdatesError::malformed(format!("part headers are not UTF-8: {}", e)));
            }
            if self.buf.len() > MAX_HEADER_SIZE + HEADER_SEPARATOR.len() {
                return Err(header_too_large());
            }
            scanned = self.buf.len().saturating_sub(HEADER_SEPARATOR.len());
            if !self.fill().await? {
                return Err(UpdatesError::malformed("stream ended in part headers"));
            }
        }
    }

    /// Read a part's body up to the next delimiter, consuming the delimiter.
    pub async fn read_body(&mut self) -> UpdatesResult<Bytes> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = find(&self.buf, &self.delimiter, scanned) {
                let body = self.buf.split_to(pos).freeze();
                self.buf.advance(self.delimiter.len());
                return Ok(body);
            }
            scanned = self.buf.len().saturating_sub(self.delimiter.len());
            if !self.fill().await? {
                return Err(UpdatesError::malformed("stream ended in part body"));
            }
        }
    }
}

fn header_too_large() -> UpdatesError {
    UpdatesError::malformed(format!(
        "part header block exceeds {} bytes",
        MAX_HEADER_SIZE
    ))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// The parts of a manifest response the loader cares about.
#[derive(Debug, Clone)]
pub struct ManifestParts {
    pub manifest: String,
    pub manifest_headers: PartHeaders,
    pub extensions: Option<Map<String, Value>>,
}

/// Read every part, keeping the ones named `manifest` and `extensions`.
pub async fn read_manifest_parts(
    stream: BoxStream<'static, UpdatesResult<Bytes>>,
    boundary: &str,
) -> UpdatesResult<ManifestParts> {
    let mut reader = MultipartReader::new(stream, boundary);
    let mut manifest: Option<(Bytes, PartHeaders)> = None;
    let mut extensions: Option<Bytes> = None;

    let mut next_part = reader.skip_preamble().await.map_err(reading_failed)?;
    while next_part {
        let headers = PartHeaders::parse(&reader.read_headers().await.map_err(reading_failed)?);
        let body = reader.read_body().await.map_err(reading_failed)?;

        match headers.disposition_name().as_deref() {
            Some("manifest") => manifest = Some((body, headers)),
            Some("extensions") => extensions = Some(body),
            name => debug!(name = ?name, bytes = body.len(), "skipping multipart part"),
        }

        next_part = reader.read_boundary().await.map_err(reading_failed)?;
    }

    let (manifest_body, manifest_headers) = manifest.ok_or_else(|| {
        UpdatesError::malformed("malformed multipart manifest response: missing manifest part")
    })?;

    let manifest = String::from_utf8(manifest_body.to_vec())
        .map_err(|e| UpdatesError::malformed(format!("manifest part is not UTF-8: {}", e)))?;

    let extensions = extensions
        .map(|body| {
            serde_json::from_slice::<Map<String, Value>>(&body).map_err(|e| {
                UpdatesError::malformed(format!(
                    "failed to parse multipart manifest extensions: {}",
                    e
                ))
            })
        })
        .transpose()?;

    Ok(ManifestParts {
        manifest,
        manifest_headers,
        extensions,
    })
}

fn reading_failed(err: UpdatesError) -> UpdatesError {
    match err {
        UpdatesError::MalformedResponse { message } => UpdatesError::malformed(format!(
            "error while reading multipart manifest response: {}",
            message
        )),
        other => other,
    }
}
