use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config;
use crate::keys::KeyRecord;

pub mod adapter;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod status;

pub use adapter::{HttpKeyModuleAdapter, KeyPage, KeyProviderAdapter};

/// Failure to map one provider-native payload onto the canonical record. Scoped to
/// a single key; a conversion failure never aborts a reconciliation pass.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid timestamp in `{field}`: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("malformed field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },
}

pub type Converter = fn(&Value) -> Result<KeyRecord, ConversionError>;

pub struct ProviderEntry {
    pub adapter: Arc<dyn KeyProviderAdapter>,
    pub convert: Converter,
}

/// key: provider-registry
/// Maps a provider id to its adapter + converter pair. Resolved once at startup;
/// provider-name dispatch does not leak past this edge.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Builds the standard aws/azure/gcp registry against the configured key modules.
    pub fn from_config() -> Self {
        let mut registry = Self::default();
        registry.register(
            "aws",
            Arc::new(HttpKeyModuleAdapter::new("aws", config::AWS_MODULE_URL.clone())),
            aws::convert,
        );
        registry.register(
            "azure",
            Arc::new(HttpKeyModuleAdapter::new(
                "azure",
                config::AZURE_MODULE_URL.clone(),
            )),
            azure::convert,
        );
        registry.register(
            "gcp",
            Arc::new(HttpKeyModuleAdapter::new("gcp", config::GCP_MODULE_URL.clone())),
            gcp::convert,
        );
        registry
    }

    pub fn register(
        &mut self,
        provider: &str,
        adapter: Arc<dyn KeyProviderAdapter>,
        convert: Converter,
    ) {
        self.entries.insert(
            provider.to_string(),
            ProviderEntry { adapter, convert },
        );
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderEntry> {
        self.entries.get(provider)
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Normalizes a provider label map. Non-string values are stringified rather than
/// dropped so no label silently disappears.
pub(crate) fn labels_from(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if let Some(Value::Object(map)) = value {
        for (key, raw) in map {
            let rendered = match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            labels.insert(key.clone(), rendered);
        }
    }
    labels
}

pub(crate) fn required_str<'a>(
    value: &'a Value,
    field: &'static str,
) -> Result<&'a str, ConversionError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ConversionError::MissingField(field))
}

pub(crate) fn optional_string(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_stringify_non_string_values() {
        let raw = json!({"team": "platform", "tier": 2});
        let labels = labels_from(Some(&raw));
        assert_eq!(labels.get("team"), Some(&"platform".to_string()));
        assert_eq!(labels.get("tier"), Some(&"2".to_string()));
    }

    #[test]
    fn registry_lists_providers_sorted() {
        let registry = ProviderRegistry::from_config();
        assert_eq!(registry.providers(), vec!["aws", "azure", "gcp"]);
        assert!(registry.get("aws").is_some());
        assert!(registry.get("oci").is_none());
    }
}
