use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{labels_from, optional_string, required_str, ConversionError};
use crate::keys::{KeyRecord, KeyStatus, UpdateSource};

/// Maps one AWS KMS key payload (`describe_key` metadata shape) onto the canonical record.
pub fn convert(raw: &Value) -> Result<KeyRecord, ConversionError> {
    let key_id = required_str(raw, "KeyId")?.to_string();
    let key_arn = required_str(raw, "Arn")?.to_string();

    // ARN format: arn:partition:service:region:account-id:resource
    let region = key_arn
        .split(':')
        .nth(3)
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ConversionError::Malformed {
            field: "Arn",
            reason: format!("no region segment in '{key_arn}'"),
        })?;

    let created_raw = required_str(raw, "CreationDate")?;
    let created_at = DateTime::parse_from_rfc3339(created_raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| ConversionError::InvalidTimestamp {
            field: "CreationDate",
            value: created_raw.to_string(),
        })?;

    let enabled = raw
        .get("Enabled")
        .and_then(Value::as_bool)
        .ok_or(ConversionError::MissingField("Enabled"))?;
    let status = if enabled {
        KeyStatus::Enabled
    } else {
        KeyStatus::Disabled
    };

    let key_spec = raw
        .get("KeySpec")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let protection_level = if key_spec.contains("HSM") {
        "HSM"
    } else {
        "SOFTWARE"
    };

    Ok(KeyRecord {
        provider: "aws".to_string(),
        key_id,
        key_arn,
        created_at: Some(created_at),
        status,
        rotation_enabled: raw
            .get("RotationEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        labels: labels_from(raw.get("Tags")),
        origin: optional_string(raw, "Origin"),
        region: Some(region),
        version: None,
        usage: optional_string(raw, "KeyUsage"),
        algorithm: optional_string(raw, "CustomerMasterKeySpec"),
        protection_level: Some(protection_level.to_string()),
        description: optional_string(raw, "Description"),
        last_updated_by: None,
        last_update_source: UpdateSource::Sync,
    })
}
