use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use crate::error::AppError;

/// key: provider-status
/// Admin-facing enablement toggle plus the provider's last successful sync time.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ProviderStatus {
    pub provider: String,
    pub is_enabled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub async fn list(pool: &PgPool) -> sqlx::Result<Vec<ProviderStatus>> {
    sqlx::query_as::<_, ProviderStatus>(
        "SELECT provider, is_enabled, last_synced_at FROM provider_status ORDER BY provider",
    )
    .fetch_all(pool)
    .await
}

pub async fn find(pool: &PgPool, provider: &str) -> sqlx::Result<Option<ProviderStatus>> {
    sqlx::query_as::<_, ProviderStatus>(
        "SELECT provider, is_enabled, last_synced_at FROM provider_status WHERE provider = $1",
    )
    .bind(provider)
    .fetch_optional(pool)
    .await
}

pub async fn list_enabled(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT provider FROM provider_status WHERE is_enabled ORDER BY provider",
    )
    .fetch_all(pool)
    .await
}

pub async fn set_enabled(
    pool: &PgPool,
    provider: &str,
    is_enabled: bool,
) -> sqlx::Result<Option<ProviderStatus>> {
    sqlx::query_as::<_, ProviderStatus>(
        r#"
        UPDATE provider_status
        SET is_enabled = $2
        WHERE provider = $1
        RETURNING provider, is_enabled, last_synced_at
        "#,
    )
    .bind(provider)
    .bind(is_enabled)
    .fetch_optional(pool)
    .await
}

/// Rejects operations against a provider an administrator has switched off.
pub async fn ensure_enabled(pool: &PgPool, provider: &str) -> Result<(), AppError> {
    let status = find(pool, provider).await?;
    match status {
        Some(status) if status.is_enabled => Ok(()),
        _ => Err(AppError::ProviderUnavailable(format!(
            "The '{provider}' module is currently disabled by an administrator."
        ))),
    }
}

/// Stamps the end of a successful reconciliation pass. Runs inside the pass transaction.
pub async fn touch_last_synced(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    synced_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE provider_status SET last_synced_at = $2 WHERE provider = $1")
        .bind(provider)
        .bind(synced_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Seeds one status row per registered provider; only `aws` starts enabled.
/// Idempotent across restarts.
pub async fn seed_defaults(pool: &PgPool, providers: &[&str]) -> sqlx::Result<()> {
    for provider in providers {
        let inserted = sqlx::query(
            r#"
            INSERT INTO provider_status (provider, is_enabled)
            VALUES ($1, $2)
            ON CONFLICT (provider) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(*provider == "aws")
        .execute(pool)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(provider, "seeded provider status");
        }
    }
    Ok(())
}
