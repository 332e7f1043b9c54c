use std::sync::Arc;

use chrono::{Duration, Utc};
use httpmock::prelude::*;
use keywarden::alarms::AlarmEmitter;
use keywarden::notify::Notifier;
use keywarden::providers::{aws, HttpKeyModuleAdapter, ProviderRegistry};
use keywarden::sync::{Reconciler, SyncError};
use sqlx::PgPool;
use url::Url;

fn registry_for(server: &MockServer) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::default();
    registry.register(
        "aws",
        Arc::new(HttpKeyModuleAdapter::new(
            "aws",
            Url::parse(&server.base_url()).unwrap(),
        )),
        aws::convert,
    );
    Arc::new(registry)
}

fn reconciler_for(pool: &PgPool, server: &MockServer) -> Reconciler {
    let emitter = AlarmEmitter::new(pool.clone(), Notifier::disabled());
    Reconciler::new(pool.clone(), registry_for(server), emitter)
}

async fn seed_provider(pool: &PgPool) {
    sqlx::query("INSERT INTO provider_status (provider, is_enabled) VALUES ('aws', TRUE)")
        .execute(pool)
        .await
        .expect("seed provider status");
}

async fn seed_key(
    pool: &PgPool,
    arn: &str,
    status: &str,
    deadline: Option<chrono::DateTime<Utc>>,
) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO key_records (provider, key_id, key_arn, status, deletion_deadline, rotation_enabled)
        VALUES ('aws', $1, $2, $3, $4, FALSE)
        RETURNING id
        "#,
    )
    .bind(arn.rsplit('/').next().unwrap_or(arn))
    .bind(arn)
    .bind(status)
    .bind(deadline)
    .fetch_one(pool)
    .await
    .expect("seed key record")
}

// key: reconcile-tests -> drift detection end to end
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn full_pass_discovers_finalizes_and_alarms(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_provider(&pool).await;

    // A: enabled key that vanished. B: pending deletion past its deadline.
    let arn_a = "arn:aws:kms:eu-central-1:111:key/aaaa";
    let arn_b = "arn:aws:kms:eu-central-1:111:key/bbbb";
    let id_a = seed_key(&pool, arn_a, "Enabled", None).await;
    let id_b = seed_key(
        &pool,
        arn_b,
        "PendingDeletion",
        Some(Utc::now() - Duration::days(10)),
    )
    .await;

    // Live listing knows neither A nor B, but carries a brand new key C.
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list-keys");
        then.status(200).json_body(serde_json::json!({
            "keys": [{
                "KeyId": "cccc",
                "Arn": "arn:aws:kms:eu-central-1:111:key/cccc",
                "CreationDate": "2024-03-01T09:30:00Z",
                "Enabled": true,
                "RotationEnabled": false,
                "KeyUsage": "ENCRYPT_DECRYPT",
                "KeySpec": "SYMMETRIC_DEFAULT"
            }],
            "next_token": null
        }));
    });

    let reconciler = reconciler_for(&pool, &server);
    let summary = reconciler.reconcile("aws").await.expect("pass succeeds");

    assert_eq!(summary.added, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.finalized, 1);
    assert_eq!(summary.removed, 1);
    assert!(summary.skipped.is_empty());

    let status_a: String = sqlx::query_scalar("SELECT status FROM key_records WHERE id = $1")
        .bind(id_a)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status_a, "Deleted");
    let status_b: String = sqlx::query_scalar("SELECT status FROM key_records WHERE id = $1")
        .bind(id_b)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status_b, "Deleted");

    let (source, updated_by): (String, Option<String>) = sqlx::query_as(
        "SELECT last_update_source, last_updated_by FROM key_records WHERE key_arn = $1",
    )
    .bind("arn:aws:kms:eu-central-1:111:key/cccc")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(source, "sync");
    assert_eq!(updated_by.as_deref(), Some("system_sync"));

    // Exactly one creation alarm, one HIGH deletion alarm for A, none for B.
    let alarms: Vec<(String, String, String)> =
        sqlx::query_as("SELECT severity, event_type, message FROM alarms ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(alarms.len(), 2);
    assert!(alarms.iter().any(|(severity, event, message)| {
        event == "OUT_OF_BAND_CREATION" && severity == "MEDIUM" && message.contains("cccc")
    }));
    assert!(alarms.iter().any(|(severity, event, message)| {
        event == "OUT_OF_BAND_DELETION" && severity == "HIGH" && message.contains("aaaa")
    }));

    let synced_at: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_synced_at FROM provider_status WHERE provider = 'aws'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(synced_at.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn drift_raises_out_of_band_change_and_applies(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_provider(&pool).await;

    let arn = "arn:aws:kms:eu-central-1:111:key/dddd";
    seed_key(&pool, arn, "Enabled", None).await;

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list-keys");
        then.status(200).json_body(serde_json::json!({
            "keys": [{
                "KeyId": "dddd",
                "Arn": arn,
                "CreationDate": "2024-03-01T09:30:00Z",
                "Enabled": false,
                "RotationEnabled": false
            }],
            "next_token": null
        }));
    });

    let summary = reconciler_for(&pool, &server)
        .reconcile("aws")
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);

    let status: String = sqlx::query_scalar("SELECT status FROM key_records WHERE key_arn = $1")
        .bind(arn)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "Disabled");

    let (severity, event): (String, String) =
        sqlx::query_as("SELECT severity, event_type FROM alarms ORDER BY id DESC LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(event, "OUT_OF_BAND_CHANGE");
    assert_eq!(severity, "HIGH");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn adapter_failure_aborts_pass_without_commits(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_provider(&pool).await;

    let arn = "arn:aws:kms:eu-central-1:111:key/eeee";
    seed_key(&pool, arn, "Enabled", None).await;

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list-keys");
        then.status(503);
    });

    let err = reconciler_for(&pool, &server)
        .reconcile("aws")
        .await
        .expect_err("pass must fail");
    assert!(matches!(err, SyncError::ProviderUnavailable { .. }));

    // Nothing committed: the stored record is untouched and no alarm was raised.
    let status: String = sqlx::query_scalar("SELECT status FROM key_records WHERE key_arn = $1")
        .bind(arn)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "Enabled");
    let alarm_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alarms")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(alarm_count, 0);
    let synced_at: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_synced_at FROM provider_status WHERE provider = 'aws'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(synced_at.is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn corrupt_pending_deletion_row_is_resolved_with_integrity_alarm(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_provider(&pool).await;

    // Claims PendingDeletion but carries no deadline.
    let arn = "arn:aws:kms:eu-central-1:111:key/ffff";
    seed_key(&pool, arn, "PendingDeletion", None).await;

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list-keys");
        then.status(200)
            .json_body(serde_json::json!({"keys": [], "next_token": null}));
    });

    let summary = reconciler_for(&pool, &server)
        .reconcile("aws")
        .await
        .unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.finalized, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM key_records WHERE key_arn = $1")
        .bind(arn)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "Deleted");

    let (severity, event): (String, String) =
        sqlx::query_as("SELECT severity, event_type FROM alarms ORDER BY id DESC LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(event, "DATA_INTEGRITY_ISSUE");
    assert_eq!(severity, "MEDIUM");
}
