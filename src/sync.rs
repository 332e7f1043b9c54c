use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alarms::{self, AlarmEmitter, NewAlarm, Severity};
use crate::error::AppError;
use crate::keys::store::{self, KeyRow};
use crate::keys::{KeyRecord, KeyStatus, StatusDecodeError, StoredStatus, UpdateSource};
use crate::providers::status as provider_status;
use crate::providers::{ConversionError, ProviderRegistry};

/// key: sync-summary
/// Outcome of one reconciliation pass. Per-item conversion failures surface as
/// explicit skip entries instead of aborting the pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncSummary {
    pub added: u32,
    pub updated: u32,
    pub finalized: u32,
    pub removed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedKey>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedKey {
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider `{0}` is not registered")]
    UnknownProvider(String),
    #[error("provider `{provider}` unavailable: {source}")]
    ProviderUnavailable {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::UnknownProvider(_) => AppError::BadRequest(err.to_string()),
            SyncError::ProviderUnavailable { .. } => AppError::ProviderUnavailable(err.to_string()),
            SyncError::Database(e) => AppError::Db(e),
        }
    }
}

/// Stored record slice the diff operates on.
#[derive(Clone, Debug)]
pub(crate) struct SyncCandidate {
    pub id: i32,
    pub key_arn: String,
    pub status: StoredStatus,
    pub rotation_enabled: bool,
    pub last_update_source: UpdateSource,
}

impl From<KeyRow> for SyncCandidate {
    fn from(row: KeyRow) -> Self {
        Self {
            status: StoredStatus::decode(&row.status, row.deletion_deadline),
            id: row.id,
            key_arn: row.key_arn,
            rotation_enabled: row.rotation_enabled,
            last_update_source: UpdateSource::from_str(&row.last_update_source),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LiveUpdate {
    pub id: i32,
    pub status: KeyStatus,
    pub rotation_enabled: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct MissingResolution {
    pub id: i32,
}

/// Everything one pass intends to commit, computed before any write happens.
#[derive(Debug, Default)]
pub(crate) struct SyncPlan {
    pub updates: Vec<LiveUpdate>,
    pub discovered: Vec<KeyRecord>,
    pub resolutions: Vec<MissingResolution>,
    pub alarms: Vec<NewAlarm>,
    pub summary: SyncSummary,
}

fn stored_label(status: &StoredStatus) -> &'static str {
    match status {
        StoredStatus::Intact(status) => status.label(),
        StoredStatus::Corrupt(StatusDecodeError::MissingDeadline) => "PendingDeletion",
        StoredStatus::Corrupt(StatusDecodeError::Unknown(_)) => "Unknown",
    }
}

/// key: sync-planner
/// Pure diff of a provider's live listing against the locally stored records.
/// Each key is visited by exactly one branch, so a pass never raises two alarms
/// for the same key.
pub(crate) fn plan_sync(
    provider: &str,
    converted: Vec<(String, Result<KeyRecord, ConversionError>)>,
    stored: Vec<SyncCandidate>,
    now: DateTime<Utc>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let stored_by_arn: BTreeMap<String, SyncCandidate> = stored
        .into_iter()
        .map(|candidate| (candidate.key_arn.clone(), candidate))
        .collect();
    let mut seen = std::collections::HashSet::new();

    for (reference, outcome) in converted {
        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                plan.summary.skipped.push(SkippedKey {
                    reference,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if !seen.insert(record.key_arn.clone()) {
            plan.summary.skipped.push(SkippedKey {
                reference,
                reason: "duplicate key arn in provider listing".to_string(),
            });
            continue;
        }

        match stored_by_arn.get(&record.key_arn) {
            Some(candidate) => {
                let differs = match &candidate.status {
                    StoredStatus::Intact(status) => {
                        *status != record.status
                            || candidate.rotation_enabled != record.rotation_enabled
                    }
                    // A corrupt stored status can never match a live one.
                    StoredStatus::Corrupt(_) => true,
                };
                if differs {
                    if candidate.last_update_source != UpdateSource::Api {
                        plan.alarms.push(NewAlarm::new(
                            Severity::High,
                            alarms::OUT_OF_BAND_CHANGE,
                            format!(
                                "Out-of-band change detected for key {}. Status changed from '{}' to '{}'.",
                                record.key_arn,
                                stored_label(&candidate.status),
                                record.status.label()
                            ),
                        ));
                    }
                    plan.updates.push(LiveUpdate {
                        id: candidate.id,
                        status: record.status.clone(),
                        rotation_enabled: record.rotation_enabled,
                    });
                    plan.summary.updated += 1;
                }
            }
            None => {
                plan.alarms.push(NewAlarm::new(
                    Severity::Medium,
                    alarms::OUT_OF_BAND_CREATION,
                    format!(
                        "Out-of-band key creation detected in {}: {}.",
                        provider.to_uppercase(),
                        record.key_arn
                    ),
                ));
                let mut discovered = record;
                discovered.last_updated_by = Some("system_sync".to_string());
                discovered.last_update_source = UpdateSource::Sync;
                plan.discovered.push(discovered);
                plan.summary.added += 1;
            }
        }
    }

    for (arn, candidate) in &stored_by_arn {
        if seen.contains(arn) {
            continue;
        }
        match &candidate.status {
            StoredStatus::Intact(KeyStatus::PendingDeletion { deadline }) => {
                if *deadline <= now {
                    // Deletion completed on schedule; the expected outcome.
                    plan.resolutions.push(MissingResolution { id: candidate.id });
                    plan.summary.finalized += 1;
                } else {
                    plan.alarms.push(NewAlarm::new(
                        Severity::High,
                        alarms::OUT_OF_BAND_DELETION,
                        format!(
                            "Out-of-band early deletion for key {arn}. It was not yet due for deletion."
                        ),
                    ));
                    plan.resolutions.push(MissingResolution { id: candidate.id });
                    plan.summary.removed += 1;
                }
            }
            StoredStatus::Corrupt(_) => {
                plan.alarms.push(NewAlarm::new(
                    Severity::Medium,
                    alarms::DATA_INTEGRITY_ISSUE,
                    format!(
                        "Malformed PendingDeletion status for key {arn} which is missing from cloud."
                    ),
                ));
                plan.resolutions.push(MissingResolution { id: candidate.id });
                plan.summary.removed += 1;
            }
            StoredStatus::Intact(KeyStatus::Deleted) => {
                // Terminal rows are not loaded; nothing to resolve.
            }
            StoredStatus::Intact(_) => {
                plan.alarms.push(NewAlarm::new(
                    Severity::High,
                    alarms::OUT_OF_BAND_DELETION,
                    format!(
                        "Out-of-band key deletion detected for active key in {}: {arn}.",
                        provider.to_uppercase()
                    ),
                ));
                plan.resolutions.push(MissingResolution { id: candidate.id });
                plan.summary.removed += 1;
            }
        }
    }

    plan
}

/// Best-effort identifier for a raw payload that failed conversion.
fn raw_reference(raw: &Value) -> String {
    raw.get("KeyId")
        .or_else(|| raw.get("Arn"))
        .or_else(|| raw.get("name"))
        .or_else(|| raw.get("key").and_then(|key| key.get("kid")))
        .and_then(Value::as_str)
        .unwrap_or("<unidentified key>")
        .to_string()
}

/// key: reconciler
/// Diffs one provider's live key listing against the local store, applies the
/// resulting mutations in a single transaction, and emits drift alarms.
#[derive(Clone)]
pub struct Reconciler {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    emitter: AlarmEmitter,
}

impl Reconciler {
    pub fn new(pool: PgPool, registry: Arc<ProviderRegistry>, emitter: AlarmEmitter) -> Self {
        Self {
            pool,
            registry,
            emitter,
        }
    }

    pub async fn reconcile(&self, provider: &str) -> Result<SyncSummary, SyncError> {
        let entry = self
            .registry
            .get(provider)
            .ok_or_else(|| SyncError::UnknownProvider(provider.to_string()))?;

        let pass_id = Uuid::new_v4();
        info!(%pass_id, provider, "starting reconciliation pass");

        // All network I/O happens before the pass transaction opens.
        let raw_keys = entry
            .adapter
            .list_all_keys()
            .await
            .map_err(|source| SyncError::ProviderUnavailable {
                provider: provider.to_string(),
                source,
            })?;

        let converted: Vec<(String, Result<KeyRecord, ConversionError>)> = raw_keys
            .iter()
            .map(|raw| {
                let reference = raw_reference(raw);
                let outcome = (entry.convert)(raw);
                if let Err(err) = &outcome {
                    warn!(%pass_id, provider, reference = %reference, %err, "skipping unconvertible key");
                }
                (reference, outcome)
            })
            .collect();

        let stored: Vec<SyncCandidate> = store::load_live_for_provider(&self.pool, provider)
            .await?
            .into_iter()
            .map(SyncCandidate::from)
            .collect();

        let now = Utc::now();
        let plan = plan_sync(provider, converted, stored, now);

        let mut tx = self.pool.begin().await?;
        for update in &plan.updates {
            store::apply_sync_update(&mut tx, update.id, &update.status, update.rotation_enabled)
                .await?;
        }
        for record in &plan.discovered {
            store::insert_discovered(&mut tx, record).await?;
        }
        for resolution in &plan.resolutions {
            store::mark_deleted_sync(&mut tx, resolution.id).await?;
        }
        let persisted = self.emitter.persist_batch(&mut tx, &plan.alarms).await?;
        provider_status::touch_last_synced(&mut tx, provider, now).await?;
        tx.commit().await?;

        self.emitter.notify_batch(&persisted).await;

        info!(
            %pass_id,
            provider,
            added = plan.summary.added,
            updated = plan.summary.updated,
            finalized = plan.summary.finalized,
            removed = plan.summary.removed,
            skipped = plan.summary.skipped.len(),
            "reconciliation pass committed"
        );
        Ok(plan.summary)
    }
}
