use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// key: key-status
/// Lifecycle state of a managed key. `PendingDeletion` always carries its deadline;
/// rows that claim the state without one fail to decode (see [`StoredStatus`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum KeyStatus {
    Enabled,
    Disabled,
    PendingDeletion { deadline: DateTime<Utc> },
    Deleted,
}

impl KeyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Enabled => "Enabled",
            KeyStatus::Disabled => "Disabled",
            KeyStatus::PendingDeletion { .. } => "PendingDeletion",
            KeyStatus::Deleted => "Deleted",
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            KeyStatus::PendingDeletion { deadline } => Some(*deadline),
            _ => None,
        }
    }

    pub fn decode(
        label: &str,
        deletion_deadline: Option<DateTime<Utc>>,
    ) -> Result<Self, StatusDecodeError> {
        match label {
            "Enabled" => Ok(KeyStatus::Enabled),
            "Disabled" => Ok(KeyStatus::Disabled),
            "Deleted" => Ok(KeyStatus::Deleted),
            "PendingDeletion" => deletion_deadline
                .map(|deadline| KeyStatus::PendingDeletion { deadline })
                .ok_or(StatusDecodeError::MissingDeadline),
            other => Err(StatusDecodeError::Unknown(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StatusDecodeError {
    #[error("unknown key status `{0}`")]
    Unknown(String),
    #[error("PendingDeletion status is missing its deadline")]
    MissingDeadline,
}

/// Status as read back from storage. Corrupt rows stay representable so the
/// reconciler can resolve them instead of failing the whole pass.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredStatus {
    Intact(KeyStatus),
    Corrupt(StatusDecodeError),
}

impl StoredStatus {
    pub fn decode(label: &str, deletion_deadline: Option<DateTime<Utc>>) -> Self {
        match KeyStatus::decode(label, deletion_deadline) {
            Ok(status) => StoredStatus::Intact(status),
            Err(err) => StoredStatus::Corrupt(err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "sync")]
    Sync,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Api => "API",
            UpdateSource::Sync => "sync",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "API" => UpdateSource::Api,
            _ => UpdateSource::Sync,
        }
    }
}

/// key: canonical-key-record
/// Provider-agnostic key metadata produced by the converters and mirrored by the
/// API proxy path. Identified by `(provider, key_arn)`.
#[derive(Clone, Debug, Serialize)]
pub struct KeyRecord {
    pub provider: String,
    pub key_id: String,
    pub key_arn: String,
    pub created_at: Option<DateTime<Utc>>,
    pub status: KeyStatus,
    pub rotation_enabled: bool,
    pub labels: BTreeMap<String, String>,
    pub origin: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub usage: Option<String>,
    pub algorithm: Option<String>,
    pub protection_level: Option<String>,
    pub description: Option<String>,
    pub last_updated_by: Option<String>,
    pub last_update_source: UpdateSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decode_accepts_well_formed_pending_deletion() {
        let deadline = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let status = KeyStatus::decode("PendingDeletion", Some(deadline)).unwrap();
        assert_eq!(status, KeyStatus::PendingDeletion { deadline });
        assert_eq!(status.label(), "PendingDeletion");
        assert_eq!(status.deadline(), Some(deadline));
    }

    #[test]
    fn decode_rejects_pending_deletion_without_deadline() {
        assert_eq!(
            KeyStatus::decode("PendingDeletion", None),
            Err(StatusDecodeError::MissingDeadline)
        );
    }

    #[test]
    fn decode_rejects_unknown_label() {
        assert!(matches!(
            KeyStatus::decode("Archived", None),
            Err(StatusDecodeError::Unknown(_))
        ));
    }

    #[test]
    fn stored_status_keeps_corrupt_rows_representable() {
        let stored = StoredStatus::decode("PendingDeletion", None);
        assert_eq!(
            stored,
            StoredStatus::Corrupt(StatusDecodeError::MissingDeadline)
        );
    }

    #[test]
    fn update_source_roundtrip() {
        assert_eq!(UpdateSource::from_str("API"), UpdateSource::Api);
        assert_eq!(UpdateSource::from_str("sync"), UpdateSource::Sync);
        assert_eq!(UpdateSource::Api.as_str(), "API");
    }
}
