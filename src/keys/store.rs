use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgQueryResult;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::{KeyRecord, KeyStatus};

const SELECT_COLUMNS: &str = "id, provider, key_id, key_arn, created_at, status, \
     deletion_deadline, rotation_enabled, labels, origin, region, version, usage, \
     algorithm, protection_level, description, last_updated_by, last_update_source, updated_at";

/// Raw storage row. The `status` + `deletion_deadline` pair is decoded into a
/// [`super::models::StoredStatus`] by callers that need the tagged form.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct KeyRow {
    pub id: i32,
    pub provider: String,
    pub key_id: String,
    pub key_arn: String,
    pub created_at: Option<DateTime<Utc>>,
    pub status: String,
    pub deletion_deadline: Option<DateTime<Utc>>,
    pub rotation_enabled: bool,
    pub labels: serde_json::Value,
    pub origin: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub usage: Option<String>,
    pub algorithm: Option<String>,
    pub protection_level: Option<String>,
    pub description: Option<String>,
    pub last_updated_by: Option<String>,
    pub last_update_source: String,
    pub updated_at: DateTime<Utc>,
}

pub async fn list_records(
    pool: &PgPool,
    provider: Option<&str>,
    status: Option<&str>,
) -> sqlx::Result<Vec<KeyRow>> {
    sqlx::query_as::<_, KeyRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM key_records
        WHERE ($1::text IS NULL OR provider = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY provider, id
        "#,
    ))
    .bind(provider)
    .bind(status)
    .fetch_all(pool)
    .await
}

pub async fn list_all(pool: &PgPool) -> sqlx::Result<Vec<KeyRow>> {
    list_records(pool, None, None).await
}

/// Every record for a provider that has not reached the terminal `Deleted` state.
pub async fn load_live_for_provider(pool: &PgPool, provider: &str) -> sqlx::Result<Vec<KeyRow>> {
    sqlx::query_as::<_, KeyRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM key_records
        WHERE provider = $1 AND status <> 'Deleted'
        ORDER BY id
        "#,
    ))
    .bind(provider)
    .fetch_all(pool)
    .await
}

/// Mirrors an API-originated mutation into the local store. Conflicts against the
/// live-row index update in place, so retried API calls stay idempotent.
pub async fn upsert_api_record(
    pool: &PgPool,
    record: &KeyRecord,
    actor: &str,
) -> sqlx::Result<KeyRow> {
    sqlx::query_as::<_, KeyRow>(&format!(
        r#"
        INSERT INTO key_records (
            provider, key_id, key_arn, created_at, status, deletion_deadline,
            rotation_enabled, labels, origin, region, version, usage, algorithm,
            protection_level, description, last_updated_by, last_update_source
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 'API')
        ON CONFLICT (provider, key_arn) WHERE status <> 'Deleted'
        DO UPDATE SET
            key_id = EXCLUDED.key_id,
            created_at = EXCLUDED.created_at,
            status = EXCLUDED.status,
            deletion_deadline = EXCLUDED.deletion_deadline,
            rotation_enabled = EXCLUDED.rotation_enabled,
            labels = EXCLUDED.labels,
            origin = EXCLUDED.origin,
            region = EXCLUDED.region,
            version = EXCLUDED.version,
            usage = EXCLUDED.usage,
            algorithm = EXCLUDED.algorithm,
            protection_level = EXCLUDED.protection_level,
            description = EXCLUDED.description,
            last_updated_by = EXCLUDED.last_updated_by,
            last_update_source = 'API',
            updated_at = NOW()
        RETURNING {SELECT_COLUMNS}
        "#,
    ))
    .bind(&record.provider)
    .bind(&record.key_id)
    .bind(&record.key_arn)
    .bind(record.created_at)
    .bind(record.status.label())
    .bind(record.status.deadline())
    .bind(record.rotation_enabled)
    .bind(serde_json::to_value(&record.labels).unwrap_or_else(|_| json!({})))
    .bind(&record.origin)
    .bind(&record.region)
    .bind(&record.version)
    .bind(&record.usage)
    .bind(&record.algorithm)
    .bind(&record.protection_level)
    .bind(&record.description)
    .bind(actor)
    .fetch_one(pool)
    .await
}

pub async fn set_status_api(
    pool: &PgPool,
    provider: &str,
    key_id: &str,
    status: &KeyStatus,
    actor: &str,
) -> sqlx::Result<Option<KeyRow>> {
    sqlx::query_as::<_, KeyRow>(&format!(
        r#"
        UPDATE key_records
        SET status = $3,
            deletion_deadline = $4,
            last_updated_by = $5,
            last_update_source = 'API',
            updated_at = NOW()
        WHERE provider = $1 AND key_id = $2 AND status <> 'Deleted'
        RETURNING {SELECT_COLUMNS}
        "#,
    ))
    .bind(provider)
    .bind(key_id)
    .bind(status.label())
    .bind(status.deadline())
    .bind(actor)
    .fetch_optional(pool)
    .await
}

pub async fn set_rotation_api(
    pool: &PgPool,
    provider: &str,
    key_id: &str,
    rotation_enabled: bool,
    actor: &str,
) -> sqlx::Result<Option<KeyRow>> {
    sqlx::query_as::<_, KeyRow>(&format!(
        r#"
        UPDATE key_records
        SET rotation_enabled = $3,
            last_updated_by = $4,
            last_update_source = 'API',
            updated_at = NOW()
        WHERE provider = $1 AND key_id = $2 AND status <> 'Deleted'
        RETURNING {SELECT_COLUMNS}
        "#,
    ))
    .bind(provider)
    .bind(key_id)
    .bind(rotation_enabled)
    .bind(actor)
    .fetch_optional(pool)
    .await
}

/// Applies a drift update observed by the reconciler. Runs inside the pass transaction.
pub async fn apply_sync_update(
    tx: &mut Transaction<'_, Postgres>,
    record_id: i32,
    status: &KeyStatus,
    rotation_enabled: bool,
) -> sqlx::Result<PgQueryResult> {
    sqlx::query(
        r#"
        UPDATE key_records
        SET status = $2,
            deletion_deadline = $3,
            rotation_enabled = $4,
            last_updated_by = 'system_sync',
            last_update_source = 'sync',
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(record_id)
    .bind(status.label())
    .bind(status.deadline())
    .bind(rotation_enabled)
    .execute(&mut **tx)
    .await
}

/// Inserts a key discovered in the provider but unknown locally. Runs inside the
/// pass transaction.
pub async fn insert_discovered(
    tx: &mut Transaction<'_, Postgres>,
    record: &KeyRecord,
) -> sqlx::Result<PgQueryResult> {
    sqlx::query(
        r#"
        INSERT INTO key_records (
            provider, key_id, key_arn, created_at, status, deletion_deadline,
            rotation_enabled, labels, origin, region, version, usage, algorithm,
            protection_level, description, last_updated_by, last_update_source
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                'system_sync', 'sync')
        "#,
    )
    .bind(&record.provider)
    .bind(&record.key_id)
    .bind(&record.key_arn)
    .bind(record.created_at)
    .bind(record.status.label())
    .bind(record.status.deadline())
    .bind(record.rotation_enabled)
    .bind(serde_json::to_value(&record.labels).unwrap_or_else(|_| json!({})))
    .bind(&record.origin)
    .bind(&record.region)
    .bind(&record.version)
    .bind(&record.usage)
    .bind(&record.algorithm)
    .bind(&record.protection_level)
    .bind(&record.description)
    .execute(&mut **tx)
    .await
}

/// Terminal transition for a key that disappeared from the provider listing.
/// Runs inside the pass transaction; the row itself is never removed.
pub async fn mark_deleted_sync(
    tx: &mut Transaction<'_, Postgres>,
    record_id: i32,
) -> sqlx::Result<PgQueryResult> {
    sqlx::query(
        r#"
        UPDATE key_records
        SET status = 'Deleted',
            last_updated_by = 'system_sync',
            last_update_source = 'sync',
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(record_id)
    .execute(&mut **tx)
    .await
}
