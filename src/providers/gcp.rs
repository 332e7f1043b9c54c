use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{labels_from, optional_string, required_str, ConversionError};
use crate::keys::{KeyRecord, KeyStatus, UpdateSource};

/// Maps one GCP Cloud KMS crypto key payload onto the canonical record. The payload
/// must carry its `primary` version; keys without one cannot be represented.
pub fn convert(raw: &Value) -> Result<KeyRecord, ConversionError> {
    let primary = raw
        .get("primary")
        .filter(|value| value.is_object())
        .ok_or(ConversionError::MissingField("primary"))?;

    // Resource name: projects/<p>/locations/<l>/keyRings/<r>/cryptoKeys/<k>
    let name = required_str(raw, "name")?.to_string();
    let region = name
        .split('/')
        .nth(3)
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ConversionError::Malformed {
            field: "name",
            reason: format!("no location segment in '{name}'"),
        })?;

    let created_raw = required_str(primary, "createTime")?;
    let created_at = DateTime::parse_from_rfc3339(created_raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| ConversionError::InvalidTimestamp {
            field: "primary.createTime",
            value: created_raw.to_string(),
        })?;

    let status = if primary.get("state").and_then(Value::as_str) == Some("ENABLED") {
        KeyStatus::Enabled
    } else {
        KeyStatus::Disabled
    };

    let version = primary
        .get("name")
        .and_then(Value::as_str)
        .and_then(|value| value.split('/').last())
        .map(ToString::to_string);

    let algorithm = raw
        .get("versionTemplate")
        .ok_or(ConversionError::MissingField("versionTemplate"))?
        .get("algorithm")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(KeyRecord {
        provider: "gcp".to_string(),
        key_id: name.clone(),
        key_arn: name,
        created_at: Some(created_at),
        status,
        rotation_enabled: raw.get("rotationPeriod").is_some(),
        labels: labels_from(raw.get("labels")),
        origin: optional_string(raw, "origin"),
        region: Some(region),
        version,
        usage: optional_string(raw, "purpose"),
        algorithm,
        protection_level: primary
            .get("protectionLevel")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        description: None,
        last_updated_by: None,
        last_update_source: UpdateSource::Sync,
    })
}
