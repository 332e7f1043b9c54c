use chrono::{TimeZone, Utc};
use serde_json::Value;

use super::{labels_from, ConversionError};
use crate::keys::{KeyRecord, KeyStatus, UpdateSource};

/// Maps one Azure Key Vault key payload onto the canonical record. The key URI
/// (`key.kid`) doubles as the ARN equivalent.
pub fn convert(raw: &Value) -> Result<KeyRecord, ConversionError> {
    let key = raw.get("key").ok_or(ConversionError::MissingField("key"))?;
    let key_uri = key
        .get("kid")
        .and_then(Value::as_str)
        .ok_or(ConversionError::MissingField("key.kid"))?;

    // URI format: https://<vault>.vault.azure.net/keys/<name>/<version>
    let segments: Vec<&str> = key_uri.split('/').collect();
    if segments.len() < 2 {
        return Err(ConversionError::Malformed {
            field: "key.kid",
            reason: format!("'{key_uri}' has no name/version segments"),
        });
    }
    let version = segments[segments.len() - 1].to_string();
    let key_id = format!("{}/{}", segments[segments.len() - 2], version);

    let attributes = raw.get("attributes").cloned().unwrap_or(Value::Null);
    let created_at = match attributes.get("created").and_then(Value::as_i64) {
        Some(epoch) => Some(Utc.timestamp_opt(epoch, 0).single().ok_or(
            ConversionError::InvalidTimestamp {
                field: "attributes.created",
                value: epoch.to_string(),
            },
        )?),
        None => None,
    };

    let enabled = attributes
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status = if enabled {
        KeyStatus::Enabled
    } else {
        KeyStatus::Disabled
    };

    let key_type = key.get("kty").and_then(Value::as_str).unwrap_or_default();
    let protection_level = if key_type.to_lowercase().contains("hsm") {
        "HSM"
    } else {
        "SOFTWARE"
    };

    let usage = key
        .get("key_ops")
        .and_then(Value::as_array)
        .map(|ops| {
            ops.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .filter(|ops| !ops.is_empty());

    Ok(KeyRecord {
        provider: "azure".to_string(),
        key_id,
        key_arn: key_uri.to_string(),
        created_at,
        status,
        rotation_enabled: raw.get("rotationPolicy").is_some(),
        labels: labels_from(raw.get("tags")),
        origin: Some("azure_provided".to_string()),
        region: Some(
            raw.get("location")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        ),
        version: Some(version),
        usage,
        algorithm: key
            .get("kty")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        protection_level: Some(protection_level.to_string()),
        description: None,
        last_updated_by: None,
        last_update_source: UpdateSource::Sync,
    })
}
