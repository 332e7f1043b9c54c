use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::users;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    name: String,
    role: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub role: String,
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let user = users::find_by_username(&pool, &payload.username)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user");
            AppError::Db(e)
        })?
        .ok_or(AppError::Unauthorized)?;

    if !user.enabled || !users::verify_password(&payload.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;
    let claims = Claims {
        sub: user.id,
        name: user.username.clone(),
        role: user.role.clone(),
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
            .parse()
            .expect("valid header value"),
    );
    Ok((headers, Json(LoginResponse { access_token: token })))
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let user = users::find_by_id(&pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(UserInfo {
        id: user.id,
        username: user.username,
        role: user.role,
    }))
}
