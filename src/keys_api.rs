use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::keys::store::{self, KeyRow};
use crate::keys::KeyStatus;
use crate::providers::status as provider_status;
use crate::providers::{ProviderEntry, ProviderRegistry};

#[derive(Deserialize)]
pub struct KeyListQuery {
    pub cloud_provider: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub cloud_provider: String,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Deserialize)]
pub struct KeyTargetRequest {
    pub cloud_provider: String,
    pub key_id: String,
}

#[derive(Deserialize)]
pub struct RotationRequest {
    pub cloud_provider: String,
    pub key_id: String,
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct ScheduleDeletionRequest {
    pub cloud_provider: String,
    pub key_id: String,
    pub days: Option<u32>,
}

#[derive(Deserialize)]
pub struct CipherRequest {
    pub cloud_provider: String,
    pub key_id: String,
    pub plaintext: Option<String>,
    pub ciphertext: Option<String>,
}

fn resolve<'a>(
    registry: &'a ProviderRegistry,
    provider: &str,
) -> Result<&'a ProviderEntry, AppError> {
    registry
        .get(provider)
        .ok_or_else(|| AppError::BadRequest("Invalid or missing cloud provider".into()))
}

/// Lists the locally mirrored records; never calls out to a provider.
pub async fn list_keys(
    Extension(pool): Extension<PgPool>,
    _auth: AuthUser,
    Query(query): Query<KeyListQuery>,
) -> AppResult<Json<Vec<KeyRow>>> {
    let records = store::list_records(
        &pool,
        query.cloud_provider.as_deref(),
        query.status.as_deref(),
    )
    .await?;
    Ok(Json(records))
}

/// Creates a key at the provider and mirrors it locally as an API-sourced record.
pub async fn create_key(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    Json(payload): Json<CreateKeyRequest>,
) -> AppResult<(StatusCode, Json<KeyRow>)> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;

    let created = entry
        .adapter
        .create_key(payload.spec)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;
    let record = (entry.convert)(&created).map_err(|err| {
        AppError::Message(format!(
            "provider returned an unconvertible key payload: {err}"
        ))
    })?;

    let row = store::upsert_api_record(&pool, &record, &auth.username).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn get_key(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    _auth: AuthUser,
    Query(query): Query<KeyTargetRequest>,
) -> AppResult<Json<Value>> {
    let entry = resolve(&registry, &query.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &query.cloud_provider).await?;
    let payload = entry
        .adapter
        .get_key(&query.key_id)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;
    Ok(Json(payload))
}

pub async fn enable_key(
    pool: Extension<PgPool>,
    registry: Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    Json(payload): Json<KeyTargetRequest>,
) -> AppResult<Json<KeyRow>> {
    set_key_enabled(pool, registry, auth, payload, true).await
}

pub async fn disable_key(
    pool: Extension<PgPool>,
    registry: Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    Json(payload): Json<KeyTargetRequest>,
) -> AppResult<Json<KeyRow>> {
    set_key_enabled(pool, registry, auth, payload, false).await
}

async fn set_key_enabled(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    payload: KeyTargetRequest,
    enabled: bool,
) -> AppResult<Json<KeyRow>> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;

    entry
        .adapter
        .set_key_enabled(&payload.key_id, enabled)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;

    let status = if enabled {
        KeyStatus::Enabled
    } else {
        KeyStatus::Disabled
    };
    let row = store::set_status_api(
        &pool,
        &payload.cloud_provider,
        &payload.key_id,
        &status,
        &auth.username,
    )
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(row))
}

pub async fn set_rotation(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    Json(payload): Json<RotationRequest>,
) -> AppResult<Json<KeyRow>> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;

    entry
        .adapter
        .set_rotation(&payload.key_id, payload.enabled)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;

    let row = store::set_rotation_api(
        &pool,
        &payload.cloud_provider,
        &payload.key_id,
        payload.enabled,
        &auth.username,
    )
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(row))
}

/// Schedules deletion at the provider and mirrors the pending window locally.
/// The reconciler later finalizes the record once the provider completes it.
pub async fn schedule_deletion(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    auth: AuthUser,
    Json(payload): Json<ScheduleDeletionRequest>,
) -> AppResult<Json<KeyRow>> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;

    let days = payload.days.unwrap_or(*config::KEY_DELETION_WINDOW_DAYS);
    entry
        .adapter
        .schedule_deletion(&payload.key_id, days)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;

    let status = KeyStatus::PendingDeletion {
        deadline: Utc::now() + Duration::days(days as i64),
    };
    let row = store::set_status_api(
        &pool,
        &payload.cloud_provider,
        &payload.key_id,
        &status,
        &auth.username,
    )
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(row))
}

/// Pure passthrough; no key material or plaintext is stored locally.
pub async fn encrypt(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    _auth: AuthUser,
    Json(payload): Json<CipherRequest>,
) -> AppResult<Json<Value>> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;
    let plaintext = payload
        .plaintext
        .ok_or_else(|| AppError::BadRequest("plaintext is required".into()))?;
    let response = entry
        .adapter
        .encrypt(&payload.key_id, &plaintext)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;
    Ok(Json(response))
}

pub async fn decrypt(
    Extension(pool): Extension<PgPool>,
    Extension(registry): Extension<Arc<ProviderRegistry>>,
    _auth: AuthUser,
    Json(payload): Json<CipherRequest>,
) -> AppResult<Json<Value>> {
    let entry = resolve(&registry, &payload.cloud_provider)?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;
    let ciphertext = payload
        .ciphertext
        .ok_or_else(|| AppError::BadRequest("ciphertext is required".into()))?;
    let response = entry
        .adapter
        .decrypt(&payload.key_id, &ciphertext)
        .await
        .map_err(|err| AppError::ProviderUnavailable(err.to_string()))?;
    Ok(Json(response))
}
