use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::alarms::{self, Alarm};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::providers::status::{self as provider_status, ProviderStatus};
use crate::sync::{Reconciler, SyncSummary};

#[derive(Deserialize)]
pub struct SyncRequest {
    pub cloud_provider: String,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub provider: String,
    pub status: &'static str,
    pub summary: SyncSummary,
}

/// On-demand reconciliation of a single provider.
pub async fn trigger_sync(
    Extension(pool): Extension<PgPool>,
    Extension(reconciler): Extension<Reconciler>,
    auth: AuthUser,
    Json(payload): Json<SyncRequest>,
) -> AppResult<Json<SyncResponse>> {
    auth.require_admin()?;
    provider_status::ensure_enabled(&pool, &payload.cloud_provider).await?;
    let summary = reconciler.reconcile(&payload.cloud_provider).await?;
    Ok(Json(SyncResponse {
        provider: payload.cloud_provider,
        status: "Synchronization successful",
        summary,
    }))
}

pub async fn list_module_statuses(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ProviderStatus>>> {
    auth.require_admin()?;
    let statuses = provider_status::list(&pool).await?;
    Ok(Json(statuses))
}

#[derive(Deserialize)]
pub struct ModuleStatusUpdate {
    pub is_enabled: bool,
}

pub async fn update_module_status(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(provider): Path<String>,
    Json(payload): Json<ModuleStatusUpdate>,
) -> AppResult<Json<ProviderStatus>> {
    auth.require_admin()?;
    let status = provider_status::set_enabled(&pool, &provider, payload.is_enabled)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(status))
}

#[derive(Deserialize)]
pub struct AlarmQuery {
    pub page_size: Option<i64>,
    pub page_token: Option<i32>,
}

#[derive(Serialize)]
pub struct AlarmPage {
    pub alarms: Vec<Alarm>,
    pub next_page_token: Option<i32>,
}

pub async fn list_alarms(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Query(query): Query<AlarmQuery>,
) -> AppResult<Json<AlarmPage>> {
    auth.require_admin()?;
    let page_size = query.page_size.unwrap_or(50).clamp(1, 500);
    let (alarms, next_page_token) = alarms::list_page(&pool, page_size, query.page_token).await?;
    Ok(Json(AlarmPage {
        alarms,
        next_page_token,
    }))
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub is_acknowledged: bool,
}

pub async fn acknowledge_alarm(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(alarm_id): Path<i32>,
    Json(payload): Json<AcknowledgeRequest>,
) -> AppResult<Json<Alarm>> {
    auth.require_admin()?;
    let alarm = alarms::set_acknowledged(&pool, alarm_id, payload.is_acknowledged)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(alarm))
}
