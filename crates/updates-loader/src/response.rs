//! Manifest response decoding: single-part or multipart by `content-type`.

use tracing::debug;

use crate::error::{UpdatesError, UpdatesResult};
use crate::multipart::read_manifest_parts;
use crate::structured;
use crate::transport::HttpResponse;
use crate::types::{ManifestHeaderData, RawManifestResponse, HEADER_SIGNATURE};

/// Decode a manifest response into body, header metadata and extensions.
///
/// Status codes are not inspected here.
pub async fn parse_manifest_response(response: HttpResponse) -> UpdatesResult<RawManifestResponse> {
    let content_type = response.header("content-type").unwrap_or("").to_string();
    let mut header_data = ManifestHeaderData::from_headers(&response.headers);

    if !is_multipart(&content_type) {
        debug!(content_type = %content_type, "parsing single-part manifest response");
        let body = response.body.text().await?;
        return Ok(RawManifestResponse {
            body,
            header_data,
            extensions: None,
        });
    }

    let boundary = structured::parameter(&content_type, ';', "boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            UpdatesError::malformed("missing boundary in multipart manifest content-type")
        })?;

    debug!(boundary = %boundary, "parsing multipart manifest response");
    let parts = read_manifest_parts(response.body.into_stream(), &boundary).await?;

    header_data.signature = parts
        .manifest_headers
        .get(HEADER_SIGNATURE)
        .map(String::from);

    Ok(RawManifestResponse {
        body: parts.manifest,
        header_data,
        extensions: parts.extensions,
    })
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .get(..10)
        .map(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
        .unwrap_or(false)
}
