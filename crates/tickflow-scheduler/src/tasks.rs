//! Task definitions — the core data model for submitted work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work handled by the workflow registered under `task_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Workflow name used for dispatch.
    pub task_type: String,
    /// Opaque data, interpreted only by the workflow.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: TaskStatus,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Retry ceiling, fixed at creation.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Advances on every status change.
    pub updated_at: DateTime<Utc>,
    /// Last failure message.
    pub error: Option<String>,
    /// Earliest time a retrying task may be dispatched again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Data returned by the workflow on success.
    pub result: Option<serde_json::Value>,
}

/// Task status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl TaskStatus {
    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses the loop is allowed to pick up.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Retrying => write!(f, "RETRYING"),
        }
    }
}

impl Task {
    /// Create a new pending task stamped with `now`.
    pub fn new(
        task_type: &str,
        payload: serde_json::Value,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            error: None,
            next_retry_at: None,
            result: None,
        }
    }

    /// Check if the loop may dispatch this task at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_dispatchable() {
            return false;
        }
        match &self.next_retry_at {
            Some(at) => *at <= now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_task_defaults() {
        let now = Utc::now();
        let task = Task::new("send-email", serde_json::json!({"to": "bob"}), 3, now);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, now);
        assert_eq!(task.updated_at, now);
        assert!(task.error.is_none());
        assert!(task.next_retry_at.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let now = Utc::now();
        let a = Task::new("t", serde_json::Value::Null, 3, now);
        let b = Task::new("t", serde_json::Value::Null, 3, now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_eligibility_respects_next_retry_at() {
        let now = Utc::now();
        let mut task = Task::new("t", serde_json::Value::Null, 3, now);
        assert!(task.is_eligible(now));

        task.status = TaskStatus::Retrying;
        task.next_retry_at = Some(now + Duration::seconds(2));
        assert!(!task.is_eligible(now));
        assert!(!task.is_eligible(now + Duration::milliseconds(1999)));
        assert!(task.is_eligible(now + Duration::seconds(2)));

        for status in [TaskStatus::Running, TaskStatus::Completed, TaskStatus::Failed] {
            task.status = status;
            task.next_retry_at = None;
            assert!(!task.is_eligible(now), "{status} must not be eligible");
        }
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
    }
}
