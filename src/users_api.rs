use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::actions::{ActionGovernor, ActionType};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::users::{self, User};

#[derive(Serialize)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub role: String,
    pub enabled: bool,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            enabled: user.enabled,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub password: Option<String>,
    pub role: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Serialize)]
pub struct DeletionRequestedResponse {
    pub message: String,
    pub action_id: i32,
}

pub async fn list_users(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<UserSummary>>> {
    auth.require_admin()?;
    let users = users::list(&pool).await?;
    Ok(Json(users.into_iter().map(UserSummary::from).collect()))
}

pub async fn create_user(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserSummary>)> {
    auth.require_admin()?;
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    if !matches!(payload.role.as_str(), "admin" | "user") {
        return Err(AppError::BadRequest(format!(
            "Unknown role '{}'",
            payload.role
        )));
    }
    let user = users::create(&pool, &payload.username, &payload.password, &payload.role).await?;
    Ok((StatusCode::CREATED, Json(UserSummary::from(user))))
}

pub async fn update_user(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(user_id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserSummary>> {
    auth.require_admin()?;
    let user = users::find_by_id(&pool, user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let password_hash = match &payload.password {
        Some(password) => {
            if password.len() < 8 {
                return Err(AppError::BadRequest("Password too short".into()));
            }
            Some(users::hash_password(password)?)
        }
        None => None,
    };
    if let Some(role) = &payload.role {
        if !matches!(role.as_str(), "admin" | "user") {
            return Err(AppError::BadRequest(format!("Unknown role '{role}'")));
        }
    }

    let updated = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET password_hash = COALESCE($2, password_hash),
            role = COALESCE($3, role),
            enabled = COALESCE($4, enabled)
        WHERE id = $1
        RETURNING id, username, password_hash, role, enabled, created_at
        "#,
    )
    .bind(user.id)
    .bind(password_hash)
    .bind(&payload.role)
    .bind(payload.enabled)
    .fetch_one(&pool)
    .await?;
    Ok(Json(UserSummary::from(updated)))
}

/// Deletion goes through dual control: this only records the request. The
/// Executor removes the principal once a second administrator approves.
pub async fn request_user_deletion(
    Extension(pool): Extension<PgPool>,
    Extension(governor): Extension<ActionGovernor>,
    auth: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<(StatusCode, Json<DeletionRequestedResponse>)> {
    auth.require_admin()?;
    let target = users::find_by_id(&pool, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if target.username == auth.username {
        return Err(AppError::Forbidden(
            "Admin cannot delete their own account.".into(),
        ));
    }

    let action = governor
        .request(
            ActionType::DeleteUser,
            &user_id.to_string(),
            &auth.username,
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DeletionRequestedResponse {
            message: "User deletion requested. A second admin must approve.".into(),
            action_id: action.id,
        }),
    ))
}
