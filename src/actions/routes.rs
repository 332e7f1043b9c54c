use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Serialize;

use super::governor::{ActionGovernor, Decision};
use super::models::PendingAction;
use crate::error::AppResult;
use crate::extractor::AuthUser;

#[derive(Serialize)]
pub struct DecisionResponse {
    pub message: String,
    pub action: PendingAction,
}

pub async fn list_pending_actions(
    Extension(governor): Extension<ActionGovernor>,
    auth: AuthUser,
) -> AppResult<Json<Vec<PendingAction>>> {
    auth.require_admin()?;
    let actions = governor.list().await.map_err(crate::error::AppError::from)?;
    Ok(Json(actions))
}

pub async fn approve_action(
    Extension(governor): Extension<ActionGovernor>,
    auth: AuthUser,
    Path(action_id): Path<i32>,
) -> AppResult<Json<DecisionResponse>> {
    auth.require_admin()?;
    let action = governor
        .decide(action_id, &auth.username, Decision::Approve)
        .await?;
    Ok(Json(DecisionResponse {
        message: format!(
            "Action {action_id} approved. It will be executed by the background worker shortly."
        ),
        action,
    }))
}

pub async fn deny_action(
    Extension(governor): Extension<ActionGovernor>,
    auth: AuthUser,
    Path(action_id): Path<i32>,
) -> AppResult<Json<DecisionResponse>> {
    auth.require_admin()?;
    let action = governor
        .decide(action_id, &auth.username, Decision::Deny)
        .await?;
    Ok(Json(DecisionResponse {
        message: format!("Action {action_id} denied. It will not be executed."),
        action,
    }))
}
