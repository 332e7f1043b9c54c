use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand_core::OsRng;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::config;
use crate::error::{AppError, AppResult};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, role, enabled, created_at FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, user_id: i32) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, role, enabled, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn list(pool: &PgPool) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, role, enabled, created_at FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn create(pool: &PgPool, username: &str, password: &str, role: &str) -> AppResult<User> {
    let hash = hash_password(password)?;
    let result = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, password_hash, role)
        VALUES ($1, $2, $3)
        RETURNING id, username, password_hash, role, enabled, created_at
        "#,
    )
    .bind(username)
    .bind(&hash)
    .bind(role)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => Ok(user),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_username_key") {
                    return Err(AppError::Conflict(format!(
                        "User '{username}' already exists."
                    )));
                }
            }
            Err(AppError::Db(e))
        }
    }
}

/// Seeds the default administrator account when `BOOTSTRAP_ADMIN_PASSWORD` is configured.
/// Idempotent: an existing `admin` user is left untouched.
pub async fn seed_default_admin(pool: &PgPool) -> anyhow::Result<()> {
    let Some(password) = config::BOOTSTRAP_ADMIN_PASSWORD.as_ref() else {
        return Ok(());
    };
    let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE username = 'admin'")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }
    let hash = hash_password(password).map_err(|e| anyhow::anyhow!("{e}"))?;
    sqlx::query("INSERT INTO users (username, password_hash, role) VALUES ('admin', $1, 'admin')")
        .bind(hash)
        .execute(pool)
        .await?;
    info!("seeded default admin account");
    Ok(())
}
