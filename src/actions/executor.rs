use anyhow::Context;
use sqlx::PgPool;
use tracing::{debug, error, info};

use super::models::{ActionStatus, ActionType, PendingAction, PendingActionRow};

/// What one sweep did. Used for logging and by tests.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub executed: Vec<i32>,
    pub failed: Vec<i32>,
}

/// key: action-executor
/// Applies actions that passed dual control. Each action's outcome commits
/// independently; a failure marks that action terminal and the sweep moves on.
#[derive(Clone)]
pub struct Executor {
    pool: PgPool,
}

impl Executor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn execute_pending(&self) -> Result<SweepOutcome, sqlx::Error> {
        let rows = sqlx::query_as::<_, PendingActionRow>(
            r#"
            SELECT id, action_type, resource_identifier, created_by, created_at,
                   expires_at, status, reviewed_by, reviewed_at
            FROM pending_actions
            WHERE status = 'APPROVED'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = SweepOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }
        info!(count = rows.len(), "found approved action(s) to execute");

        for action in rows.into_iter().map(PendingAction::from) {
            match self.dispatch(&action).await {
                Ok(()) => {
                    self.mark(action.id, ActionStatus::Executed).await;
                    info!(
                        action_id = action.id,
                        action_type = action.action_type.as_str(),
                        resource = %action.resource_identifier,
                        "executed approved action"
                    );
                    outcome.executed.push(action.id);
                }
                Err(err) => {
                    error!(
                        ?err,
                        action_id = action.id,
                        action_type = action.action_type.as_str(),
                        "failed to execute action; marking terminal"
                    );
                    self.mark(action.id, ActionStatus::FailedExecution).await;
                    outcome.failed.push(action.id);
                }
            }
        }
        Ok(outcome)
    }

    async fn dispatch(&self, action: &PendingAction) -> anyhow::Result<()> {
        match action.action_type {
            ActionType::DeleteUser => {
                let user_id: i32 = action
                    .resource_identifier
                    .parse()
                    .context("resource identifier is not a user id")?;
                let result = sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                if result.rows_affected() == 0 {
                    // Already gone; deletion is idempotent.
                    debug!(user_id, "user already absent");
                }
                Ok(())
            }
        }
    }

    async fn mark(&self, action_id: i32, status: ActionStatus) {
        let result = sqlx::query(
            "UPDATE pending_actions SET status = $2 WHERE id = $1 AND status = 'APPROVED'",
        )
        .bind(action_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            error!(?err, action_id, "failed to record action outcome");
        }
    }
}
