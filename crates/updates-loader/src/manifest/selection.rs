//! Filter checks applied to built manifests.

use serde_json::{Map, Value};

use super::UpdateManifest;

/// Decides whether a manifest is consistent with the filters it was served with.
pub trait SelectionPolicy: Send + Sync {
    fn matches_filters(&self, manifest: &UpdateManifest, filters: Option<&Map<String, Value>>) -> bool;
}

/// Every filter key present in the manifest `metadata` must carry the same value.
///
/// Keys absent from `metadata` are ignored, so a manifest without metadata
/// matches any filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterSelectionPolicy;

impl SelectionPolicy for FilterSelectionPolicy {
    fn matches_filters(&self, manifest: &UpdateManifest, filters: Option<&Map<String, Value>>) -> bool {
        let (Some(filters), Some(metadata)) = (filters, manifest.metadata()) else {
            return true;
        };

        filters.iter().all(|(key, expected)| match metadata.get(key) {
            Some(actual) => as_filter_string(actual) == as_filter_string(expected),
            None => true,
        })
    }
}

fn as_filter_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
