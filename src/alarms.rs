use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

use crate::notify::Notifier;

pub const OUT_OF_BAND_CHANGE: &str = "OUT_OF_BAND_CHANGE";
pub const OUT_OF_BAND_CREATION: &str = "OUT_OF_BAND_CREATION";
pub const OUT_OF_BAND_DELETION: &str = "OUT_OF_BAND_DELETION";
pub const DATA_INTEGRITY_ISSUE: &str = "DATA_INTEGRITY_ISSUE";
pub const CBOM_KEY_STATUS_UNRECOGNIZED: &str = "CBOM_KEY_STATUS_UNRECOGNIZED";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Persisted alarm row. Append-only; acknowledgement is the only later mutation.
#[derive(Clone, Debug, Serialize)]
pub struct Alarm {
    pub id: i32,
    pub raised_at: DateTime<Utc>,
    pub severity: Severity,
    pub event_type: String,
    pub message: String,
    pub is_acknowledged: bool,
}

#[derive(sqlx::FromRow)]
struct AlarmRow {
    id: i32,
    raised_at: DateTime<Utc>,
    severity: String,
    event_type: String,
    message: String,
    is_acknowledged: bool,
}

impl From<AlarmRow> for Alarm {
    fn from(row: AlarmRow) -> Self {
        Self {
            id: row.id,
            raised_at: row.raised_at,
            severity: Severity::from_str(&row.severity),
            event_type: row.event_type,
            message: row.message,
            is_acknowledged: row.is_acknowledged,
        }
    }
}

/// An alarm that has not been persisted yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewAlarm {
    pub severity: Severity,
    pub event_type: String,
    pub message: String,
}

impl NewAlarm {
    pub fn new(severity: Severity, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            event_type: event_type.to_string(),
            message: message.into(),
        }
    }
}

/// key: alarm-emitter
/// Persists alarms and forwards notable ones to the outbound notification channel.
/// A delivery failure never rolls back the stored alarm.
#[derive(Clone)]
pub struct AlarmEmitter {
    pool: PgPool,
    notifier: Notifier,
}

impl AlarmEmitter {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    pub async fn raise(
        &self,
        severity: Severity,
        event_type: &str,
        message: &str,
    ) -> anyhow::Result<Alarm> {
        warn!(severity = severity.as_str(), event_type, message, "raising alarm");
        let row = sqlx::query_as::<_, AlarmRow>(
            r#"
            INSERT INTO alarms (severity, event_type, message)
            VALUES ($1, $2, $3)
            RETURNING id, raised_at, severity, event_type, message, is_acknowledged
            "#,
        )
        .bind(severity.as_str())
        .bind(event_type)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        let alarm = Alarm::from(row);
        self.notifier.send_alarm(&alarm).await;
        Ok(alarm)
    }

    /// Persists a batch inside an already-open transaction. Used by the reconciler
    /// so a pass commits atomically; notifications follow the commit.
    pub async fn persist_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch: &[NewAlarm],
    ) -> sqlx::Result<Vec<Alarm>> {
        let mut persisted = Vec::with_capacity(batch.len());
        for alarm in batch {
            warn!(
                severity = alarm.severity.as_str(),
                event_type = %alarm.event_type,
                message = %alarm.message,
                "raising alarm"
            );
            let row = sqlx::query_as::<_, AlarmRow>(
                r#"
                INSERT INTO alarms (severity, event_type, message)
                VALUES ($1, $2, $3)
                RETURNING id, raised_at, severity, event_type, message, is_acknowledged
                "#,
            )
            .bind(alarm.severity.as_str())
            .bind(&alarm.event_type)
            .bind(&alarm.message)
            .fetch_one(&mut **tx)
            .await?;
            persisted.push(Alarm::from(row));
        }
        Ok(persisted)
    }

    pub async fn notify_batch(&self, alarms: &[Alarm]) {
        for alarm in alarms {
            self.notifier.send_alarm(alarm).await;
        }
    }
}

/// Newest-first page of alarms, keyed by an id page token like the other listings.
pub async fn list_page(
    pool: &PgPool,
    page_size: i64,
    page_token: Option<i32>,
) -> sqlx::Result<(Vec<Alarm>, Option<i32>)> {
    let rows = sqlx::query_as::<_, AlarmRow>(
        r#"
        SELECT id, raised_at, severity, event_type, message, is_acknowledged
        FROM alarms
        WHERE ($2::int IS NULL OR id < $2)
        ORDER BY id DESC
        LIMIT $1
        "#,
    )
    .bind(page_size + 1)
    .bind(page_token)
    .fetch_all(pool)
    .await?;

    let mut alarms: Vec<Alarm> = rows.into_iter().map(Alarm::from).collect();
    let next_page_token = if alarms.len() as i64 > page_size {
        alarms.truncate(page_size as usize);
        alarms.last().map(|alarm| alarm.id)
    } else {
        None
    };
    Ok((alarms, next_page_token))
}

pub async fn set_acknowledged(
    pool: &PgPool,
    alarm_id: i32,
    is_acknowledged: bool,
) -> sqlx::Result<Option<Alarm>> {
    let row = sqlx::query_as::<_, AlarmRow>(
        r#"
        UPDATE alarms
        SET is_acknowledged = $2
        WHERE id = $1
        RETURNING id, raised_at, severity, event_type, message, is_acknowledged
        "#,
    )
    .bind(alarm_id)
    .bind(is_acknowledged)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Alarm::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrip() {
        assert_eq!(Severity::from_str("HIGH"), Severity::High);
        assert_eq!(Severity::from_str("MEDIUM"), Severity::Medium);
        assert_eq!(Severity::from_str("anything-else"), Severity::Low);
        assert_eq!(Severity::High.as_str(), "HIGH");
    }
}
