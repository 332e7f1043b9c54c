use keywarden::actions::{
    ActionGovernor, ActionStatus, ActionType, Decision, Executor, GovernorError,
};
use sqlx::PgPool;

async fn seed_admin(pool: &PgPool, username: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (username, password_hash, role) VALUES ($1, 'hash', 'admin') RETURNING id",
    )
    .bind(username)
    .fetch_one(pool)
    .await
    .expect("seed admin")
}

// key: governor-tests -> dual-control state machine
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn requester_cannot_review_own_action(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_admin(&pool, "alice").await;
    let target_id = seed_admin(&pool, "doomed").await;

    let governor = ActionGovernor::new(pool.clone());
    let action = governor
        .request(ActionType::DeleteUser, &target_id.to_string(), "alice")
        .await
        .expect("request action");
    assert_eq!(action.status, ActionStatus::Pending);

    let rejection = governor
        .decide(action.id, "alice", Decision::Approve)
        .await
        .expect_err("self review must fail");
    assert!(matches!(rejection, GovernorError::SelfReview));

    let status: String = sqlx::query_scalar("SELECT status FROM pending_actions WHERE id = $1")
        .bind(action.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "PENDING");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn second_admin_approves_and_rereview_conflicts(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_admin(&pool, "alice").await;
    seed_admin(&pool, "bob").await;
    let target_id = seed_admin(&pool, "doomed").await;

    let governor = ActionGovernor::new(pool.clone());
    let action = governor
        .request(ActionType::DeleteUser, &target_id.to_string(), "alice")
        .await
        .unwrap();

    let approved = governor
        .decide(action.id, "bob", Decision::Approve)
        .await
        .expect("second admin approves");
    assert_eq!(approved.status, ActionStatus::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("bob"));
    assert!(approved.reviewed_at.is_some());

    // No re-review of a decided action, not even by a third party.
    let conflict = governor
        .decide(action.id, "carol", Decision::Deny)
        .await
        .expect_err("re-review must conflict");
    assert!(matches!(conflict, GovernorError::Conflict));

    let (status, reviewed_by): (String, Option<String>) =
        sqlx::query_as("SELECT status, reviewed_by FROM pending_actions WHERE id = $1")
            .bind(action.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "APPROVED");
    assert_eq!(reviewed_by.as_deref(), Some("bob"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn denied_action_is_terminal(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_admin(&pool, "alice").await;
    seed_admin(&pool, "bob").await;
    let target_id = seed_admin(&pool, "doomed").await;

    let governor = ActionGovernor::new(pool.clone());
    let action = governor
        .request(ActionType::DeleteUser, &target_id.to_string(), "alice")
        .await
        .unwrap();
    let denied = governor
        .decide(action.id, "bob", Decision::Deny)
        .await
        .unwrap();
    assert_eq!(denied.status, ActionStatus::Denied);

    let conflict = governor
        .decide(action.id, "bob", Decision::Approve)
        .await
        .expect_err("denied action is terminal");
    assert!(matches!(conflict, GovernorError::Conflict));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn sweep_drains_every_approved_action(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_admin(&pool, "alice").await;
    seed_admin(&pool, "bob").await;
    let target_id = seed_admin(&pool, "doomed").await;

    let governor = ActionGovernor::new(pool.clone());

    // A valid deletion, a malformed resource id, and a target that is already gone.
    let delete_user = governor
        .request(ActionType::DeleteUser, &target_id.to_string(), "alice")
        .await
        .unwrap();
    let malformed = governor
        .request(ActionType::DeleteUser, "not-a-number", "alice")
        .await
        .unwrap();
    let absent = governor
        .request(ActionType::DeleteUser, "999999", "alice")
        .await
        .unwrap();
    for action in [&delete_user, &malformed, &absent] {
        governor
            .decide(action.id, "bob", Decision::Approve)
            .await
            .unwrap();
    }

    let executor = Executor::new(pool.clone());
    let outcome = executor.execute_pending().await.unwrap();
    assert_eq!(outcome.executed.len(), 2);
    assert_eq!(outcome.failed, vec![malformed.id]);

    // Property: nothing stays APPROVED after a sweep.
    let approved_left: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_actions WHERE status = 'APPROVED'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(approved_left, 0);

    let user_gone: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(target_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(user_gone.is_none(), "approved deletion must remove the user");

    let failed_status: String =
        sqlx::query_scalar("SELECT status FROM pending_actions WHERE id = $1")
            .bind(malformed.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(failed_status, "FAILED_EXECUTION");

    // A second sweep finds nothing; failures are never retried.
    let second = executor.execute_pending().await.unwrap();
    assert!(second.executed.is_empty());
    assert!(second.failed.is_empty());
}
