use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of sensitive operations subject to dual control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "DELETE_USER")]
    DeleteUser,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DeleteUser => "DELETE_USER",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "DELETE_USER" => Some(ActionType::DeleteUser),
            _ => None,
        }
    }
}

/// `Pending -> {Approved, Denied}`; `Approved -> {Executed, FailedExecution}`.
/// `Denied`, `Executed` and `FailedExecution` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Approved,
    Denied,
    Executed,
    FailedExecution,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::Approved => "APPROVED",
            ActionStatus::Denied => "DENIED",
            ActionStatus::Executed => "EXECUTED",
            ActionStatus::FailedExecution => "FAILED_EXECUTION",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "APPROVED" => ActionStatus::Approved,
            "DENIED" => ActionStatus::Denied,
            "EXECUTED" => ActionStatus::Executed,
            "FAILED_EXECUTION" => ActionStatus::FailedExecution,
            _ => ActionStatus::Pending,
        }
    }
}

/// key: pending-action
/// One requested sensitive action moving through the dual-control state machine.
/// Rows are never deleted; `expires_at` is recorded but not enforced.
#[derive(Clone, Debug, Serialize)]
pub struct PendingAction {
    pub id: i32,
    pub action_type: ActionType,
    pub resource_identifier: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PendingActionRow {
    pub id: i32,
    pub action_type: String,
    pub resource_identifier: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl From<PendingActionRow> for PendingAction {
    fn from(row: PendingActionRow) -> Self {
        Self {
            id: row.id,
            // Unknown types cannot be inserted; default keeps the decode total.
            action_type: ActionType::from_str(&row.action_type).unwrap_or(ActionType::DeleteUser),
            resource_identifier: row.resource_identifier,
            created_by: row.created_by,
            created_at: row.created_at,
            expires_at: row.expires_at,
            status: ActionStatus::from_str(&row.status),
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_status_roundtrip() {
        for status in [
            ActionStatus::Pending,
            ActionStatus::Approved,
            ActionStatus::Denied,
            ActionStatus::Executed,
            ActionStatus::FailedExecution,
        ] {
            assert_eq!(ActionStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn action_type_rejects_unknown_values() {
        assert_eq!(ActionType::from_str("DELETE_USER"), Some(ActionType::DeleteUser));
        assert_eq!(ActionType::from_str("DROP_TABLES"), None);
    }
}
