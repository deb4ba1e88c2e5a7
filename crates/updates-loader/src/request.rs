//! Manifest and asset request construction.

use serde_json::{Map, Value};
use url::Url;

use crate::config::UpdatesConfig;
use crate::error::{UpdatesError, UpdatesResult};
use crate::transport::HttpRequest;
use crate::types::AssetDescriptor;

pub const MANIFEST_ACCEPT: &str = "multipart/mixed,application/expo+json,application/json";
pub const API_VERSION: &str = "1";

/// Servers may cap header sizes, so the fatal error report is truncated.
pub const MAX_FATAL_ERROR_CHARS: usize = 1024;

/// Build the manifest request.
///
/// `extra_headers` go in first so the protocol headers below replace any
/// clashing caller value.
pub fn manifest_request(
    config: &UpdatesConfig,
    extra_headers: Option<&Map<String, Value>>,
    previous_fatal_error: Option<&str>,
) -> UpdatesResult<HttpRequest> {
    let url = Url::parse(&config.update_url).map_err(|e| {
        UpdatesError::config(format!("invalid update URL {:?}: {}", config.update_url, e))
    })?;
    let mut request = HttpRequest::get(url);

    if let Some(extra) = extra_headers {
        for (name, value) in extra {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            request.set_header(name, &value)?;
        }
    }

    request.set_header("Accept", MANIFEST_ACCEPT)?;
    apply_platform_headers(&mut request, config)?;
    request.set_header("Expo-JSON-Error", "true")?;
    request.set_header(
        "Expo-Accept-Signature",
        if config.expects_signed_manifest {
            "true"
        } else {
            "false"
        },
    )?;

    match config.runtime_version.as_deref() {
        Some(runtime_version) if !runtime_version.is_empty() => {
            request.set_header("Expo-Runtime-Version", runtime_version)?;
        }
        _ => {
            request.set_header("Expo-SDK-Version", config.sdk_version.as_deref().unwrap_or(""))?;
        }
    }

    request.set_header("Expo-Release-Channel", &config.release_channel)?;

    if let Some(fatal_error) = previous_fatal_error {
        let truncated: String = fatal_error.chars().take(MAX_FATAL_ERROR_CHARS).collect();
        request.set_header("Expo-Fatal-Error", &truncated)?;
    }

    apply_configured_headers(&mut request, config)?;

    if let Some(code_signing) = &config.code_signing {
        request.set_header(
            "expo-expects-signature",
            &code_signing.accept_signature_header(),
        )?;
    }

    Ok(request)
}

/// Build the download request for one asset.
pub fn asset_request(asset: &AssetDescriptor, config: &UpdatesConfig) -> UpdatesResult<HttpRequest> {
    let url = asset.url.clone().ok_or_else(|| UpdatesError::MissingUrl {
        key: asset.key.clone(),
    })?;
    let mut request = HttpRequest::get(url);

    for (name, value) in &asset.extra_request_headers {
        request.set_header(name, value)?;
    }
    apply_platform_headers(&mut request, config)?;
    apply_configured_headers(&mut request, config)?;

    Ok(request)
}

fn apply_platform_headers(request: &mut HttpRequest, config: &UpdatesConfig) -> UpdatesResult<()> {
    request.set_header("Expo-Platform", &config.platform)?;
    request.set_header("Expo-API-Version", API_VERSION)?;
    request.set_header("Expo-Updates-Environment", &config.environment)
}

fn apply_configured_headers(request: &mut HttpRequest, config: &UpdatesConfig) -> UpdatesResult<()> {
    for (name, value) in &config.request_headers {
        request.set_header(name, value)?;
    }
    Ok(())
}
