use chrono::{Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::models::{ActionStatus, ActionType, PendingAction, PendingActionRow};
use crate::config;
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("pending action not found")]
    NotFound,
    #[error("This action is not pending approval.")]
    Conflict,
    #[error("You cannot review your own request.")]
    SelfReview,
}

impl From<GovernorError> for AppError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::Database(e) => AppError::Db(e),
            GovernorError::NotFound => AppError::NotFound,
            GovernorError::Conflict => AppError::Conflict(GovernorError::Conflict.to_string()),
            GovernorError::SelfReview => {
                AppError::Forbidden(GovernorError::SelfReview.to_string())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    fn resulting_status(self) -> ActionStatus {
        match self {
            Decision::Approve => ActionStatus::Approved,
            Decision::Deny => ActionStatus::Denied,
        }
    }
}

/// Two-person-rule gate for a review. Checked before any mutation; the order
/// matters: a terminal action conflicts even for its own requester.
pub(crate) fn check_decision(action: &PendingAction, reviewer: &str) -> Result<(), GovernorError> {
    if action.status != ActionStatus::Pending {
        return Err(GovernorError::Conflict);
    }
    if action.created_by == reviewer {
        return Err(GovernorError::SelfReview);
    }
    Ok(())
}

/// key: action-governor
/// State machine for sensitive administrative actions: creation by one privileged
/// actor, approval or denial by a distinct second one.
#[derive(Clone)]
pub struct ActionGovernor {
    pool: PgPool,
}

impl ActionGovernor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn request(
        &self,
        action_type: ActionType,
        resource_identifier: &str,
        requester: &str,
    ) -> Result<PendingAction, GovernorError> {
        let expires_at = Utc::now() + Duration::hours(*config::ACTION_EXPIRY_HOURS);
        let row = sqlx::query_as::<_, PendingActionRow>(
            r#"
            INSERT INTO pending_actions (action_type, resource_identifier, created_by, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, action_type, resource_identifier, created_by, created_at,
                      expires_at, status, reviewed_by, reviewed_at
            "#,
        )
        .bind(action_type.as_str())
        .bind(resource_identifier)
        .bind(requester)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        let action = PendingAction::from(row);
        info!(
            action_id = action.id,
            action_type = action.action_type.as_str(),
            requester,
            "sensitive action requested; awaiting second-person review"
        );
        Ok(action)
    }

    pub async fn decide(
        &self,
        action_id: i32,
        reviewer: &str,
        decision: Decision,
    ) -> Result<PendingAction, GovernorError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, PendingActionRow>(
            r#"
            SELECT id, action_type, resource_identifier, created_by, created_at,
                   expires_at, status, reviewed_by, reviewed_at
            FROM pending_actions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(action_id)
        .fetch_optional(&mut *tx)
        .await?;

        let action = PendingAction::from(row.ok_or(GovernorError::NotFound)?);
        check_decision(&action, reviewer)?;

        let status = decision.resulting_status();
        let updated = sqlx::query_as::<_, PendingActionRow>(
            r#"
            UPDATE pending_actions
            SET status = $2, reviewed_by = $3, reviewed_at = NOW()
            WHERE id = $1
            RETURNING id, action_type, resource_identifier, created_by, created_at,
                      expires_at, status, reviewed_by, reviewed_at
            "#,
        )
        .bind(action_id)
        .bind(status.as_str())
        .bind(reviewer)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let action = PendingAction::from(updated);
        info!(
            action_id = action.id,
            status = action.status.as_str(),
            reviewer,
            "sensitive action reviewed"
        );
        Ok(action)
    }

    pub async fn list(&self) -> Result<Vec<PendingAction>, GovernorError> {
        let rows = sqlx::query_as::<_, PendingActionRow>(
            r#"
            SELECT id, action_type, resource_identifier, created_by, created_at,
                   expires_at, status, reviewed_by, reviewed_at
            FROM pending_actions
            ORDER BY id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PendingAction::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn action(status: ActionStatus, created_by: &str) -> PendingAction {
        PendingAction {
            id: 1,
            action_type: ActionType::DeleteUser,
            resource_identifier: "7".into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            status,
            reviewed_by: None,
            reviewed_at: None,
        }
    }

    #[test]
    fn requester_may_never_review_their_own_action() {
        let pending = action(ActionStatus::Pending, "alice");
        assert!(matches!(
            check_decision(&pending, "alice"),
            Err(GovernorError::SelfReview)
        ));
    }

    #[test]
    fn second_person_review_is_allowed() {
        let pending = action(ActionStatus::Pending, "alice");
        assert!(check_decision(&pending, "bob").is_ok());
    }

    #[test]
    fn non_pending_action_conflicts_for_everyone() {
        for status in [
            ActionStatus::Approved,
            ActionStatus::Denied,
            ActionStatus::Executed,
            ActionStatus::FailedExecution,
        ] {
            let decided = action(status, "alice");
            assert!(matches!(
                check_decision(&decided, "bob"),
                Err(GovernorError::Conflict)
            ));
        }
    }

    #[test]
    fn conflict_takes_precedence_over_self_review() {
        let decided = action(ActionStatus::Denied, "alice");
        assert!(matches!(
            check_decision(&decided, "alice"),
            Err(GovernorError::Conflict)
        ));
    }
}
