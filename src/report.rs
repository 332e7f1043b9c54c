use axum::{extract::Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::alarms::{self, AlarmEmitter, Severity};
use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::keys::store::{self, KeyRow};
use crate::providers::status as provider_status;
use crate::sync::Reconciler;

/// CBOM-style inventory document (CycloneDX-flavoured JSON). A pure formatting
/// pass over the stored key records; it never talks to a provider itself.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CbomReport {
    pub bom_format: &'static str,
    pub spec_version: &'static str,
    pub serial_number: String,
    pub version: u32,
    pub metadata: CbomMetadata,
    pub components: Vec<CbomComponent>,
}

#[derive(Debug, Serialize)]
pub struct CbomMetadata {
    pub timestamp: DateTime<Utc>,
    pub tools: Vec<CbomTool>,
}

#[derive(Debug, Serialize)]
pub struct CbomTool {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CbomComponent {
    #[serde(rename = "type")]
    pub component_type: &'static str,
    #[serde(rename = "bom-ref")]
    pub bom_ref: String,
    pub name: String,
    pub group: String,
    #[serde(rename = "cryptoProperties")]
    pub crypto_properties: CryptoProperties,
    pub properties: Vec<Property>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoProperties {
    pub asset_type: &'static str,
    pub related_crypto_material_properties: RelatedCryptoMaterial,
}

#[derive(Debug, Serialize)]
pub struct RelatedCryptoMaterial {
    #[serde(rename = "type")]
    pub material_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct Property {
    pub name: &'static str,
    pub value: String,
}

/// Maps a stored status label onto the CycloneDX related-crypto-material state.
/// Unrecognized labels yield `None` and are reported by the caller.
pub(crate) fn material_state(status_label: &str) -> Option<&'static str> {
    let normalized = status_label.trim().to_lowercase();
    match normalized.as_str() {
        "enabled" => Some("active"),
        "disabled" | "inactive" => Some("deactivated"),
        "deleted" => Some("destroyed"),
        other if other.starts_with("pendingdeletion") => Some("suspended"),
        _ => None,
    }
}

fn push_property(properties: &mut Vec<Property>, name: &'static str, value: Option<String>) {
    if let Some(value) = value {
        properties.push(Property { name, value });
    }
}

/// Builds the report plus the list of status labels that could not be mapped.
pub(crate) fn build_report(
    records: &[KeyRow],
    generated_at: DateTime<Utc>,
) -> (CbomReport, Vec<String>) {
    let mut components = Vec::with_capacity(records.len());
    let mut unrecognized = Vec::new();

    for record in records {
        let state = material_state(&record.status);
        if state.is_none() {
            unrecognized.push(record.status.clone());
        }

        let mut properties = Vec::new();
        push_property(&mut properties, "kms:region", record.region.clone());
        push_property(&mut properties, "kms:origin", record.origin.clone());
        push_property(&mut properties, "kms:algorithm", record.algorithm.clone());
        push_property(&mut properties, "kms:usage", record.usage.clone());
        push_property(
            &mut properties,
            "kms:protection_level",
            record.protection_level.clone(),
        );
        push_property(
            &mut properties,
            "kms:rotation_enabled",
            Some(record.rotation_enabled.to_string()),
        );
        push_property(
            &mut properties,
            "kms:created_at",
            record.created_at.map(|value| value.to_rfc3339()),
        );

        components.push(CbomComponent {
            component_type: "cryptographic-asset",
            bom_ref: format!("urn:kms:key:{}", record.key_arn),
            name: record.key_id.clone(),
            group: record.provider.clone(),
            crypto_properties: CryptoProperties {
                asset_type: "related-crypto-material",
                related_crypto_material_properties: RelatedCryptoMaterial {
                    material_type: "key",
                    state,
                },
            },
            properties,
        });
    }

    let report = CbomReport {
        bom_format: "CycloneDX",
        spec_version: "1.6",
        serial_number: format!("urn:uuid:{}", Uuid::new_v4()),
        version: 1,
        metadata: CbomMetadata {
            timestamp: generated_at,
            tools: vec![CbomTool {
                name: "keywarden",
                version: env!("CARGO_PKG_VERSION"),
            }],
        },
        components,
    };
    (report, unrecognized)
}

/// Refreshes enabled providers best-effort, then renders the inventory. A failed
/// refresh degrades to the last known records rather than failing the report.
pub async fn get_cbom(
    Extension(pool): Extension<PgPool>,
    Extension(reconciler): Extension<Reconciler>,
    Extension(emitter): Extension<AlarmEmitter>,
    auth: AuthUser,
) -> AppResult<Json<CbomReport>> {
    auth.require_admin()?;

    match provider_status::list_enabled(&pool).await {
        Ok(providers) => {
            for provider in providers {
                if let Err(err) = reconciler.reconcile(&provider).await {
                    warn!(?err, provider = %provider, "pre-report synchronization failed");
                }
            }
        }
        Err(err) => warn!(?err, "could not list enabled providers before report"),
    }

    let records = store::list_all(&pool).await?;
    let (report, unrecognized) = build_report(&records, Utc::now());
    for status in unrecognized {
        if let Err(err) = emitter
            .raise(
                Severity::Low,
                alarms::CBOM_KEY_STATUS_UNRECOGNIZED,
                &format!("Unrecognized internal key status '{status}'."),
            )
            .await
        {
            warn!(?err, "failed to record report status alarm");
        }
    }
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: &str) -> KeyRow {
        KeyRow {
            id: 1,
            provider: "aws".into(),
            key_id: "key-1".into(),
            key_arn: "arn:aws:kms:eu-central-1:1:key/key-1".into(),
            created_at: None,
            status: status.into(),
            deletion_deadline: None,
            rotation_enabled: true,
            labels: json!({}),
            origin: Some("AWS_KMS".into()),
            region: Some("eu-central-1".into()),
            version: None,
            usage: Some("ENCRYPT_DECRYPT".into()),
            algorithm: Some("SYMMETRIC_DEFAULT".into()),
            protection_level: Some("SOFTWARE".into()),
            description: None,
            last_updated_by: None,
            last_update_source: "sync".into(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_labels_map_to_material_states() {
        assert_eq!(material_state("Enabled"), Some("active"));
        assert_eq!(material_state("Disabled"), Some("deactivated"));
        assert_eq!(material_state("PendingDeletion"), Some("suspended"));
        assert_eq!(material_state("Deleted"), Some("destroyed"));
        assert_eq!(material_state("Archived"), None);
    }

    #[test]
    fn report_covers_every_record_and_flags_unrecognized() {
        let records = vec![row("Enabled"), row("Archived")];
        let (report, unrecognized) = build_report(&records, Utc::now());
        assert_eq!(report.components.len(), 2);
        assert_eq!(unrecognized, vec!["Archived".to_string()]);
        assert_eq!(report.bom_format, "CycloneDX");
        assert_eq!(
            report.components[0].bom_ref,
            "urn:kms:key:arn:aws:kms:eu-central-1:1:key/key-1"
        );
        assert_eq!(
            report.components[0]
                .crypto_properties
                .related_crypto_material_properties
                .state,
            Some("active")
        );
    }
}
