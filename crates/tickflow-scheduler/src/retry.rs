//! Retry Policy — turns one dispatch outcome into the next task state.
//!
//! Pure: no clock reads, no I/O, no logging. The engine supplies `now` and applies
//! the returned [`Transition`] to the stored task.
//!
//! ```text
//! Pending/Retrying ──dispatch──▶ Running ──success──────────────▶ Completed
//!        │                          │
//!        │                          ├─failure, retries left──────▶ Retrying (+base^n s)
//!        │                          └─failure, none left / final─▶ Failed
//!        └─no workflow registered───────────────────────────────▶ Failed
//! ```

use chrono::{DateTime, Duration, Utc};
use tickflow_core::SchedulerConfig;

use crate::tasks::{Task, TaskStatus};
use crate::workflow::WorkflowResult;

/// Error recorded on tasks whose type has no registered workflow.
pub const NOT_REGISTERED: &str = "workflow not registered";
/// Error recorded when a workflow fails without saying why.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Everything that can come out of dispatching one task.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The workflow returned `success = true`.
    Succeeded { data: Option<serde_json::Value> },
    /// The workflow returned `success = false`.
    ReportedFailure { message: String, can_retry: bool },
    /// The workflow returned `Err` or panicked.
    ThrownError { message: String },
    /// No workflow is registered for the task type.
    NotRegistered,
}

impl From<WorkflowResult> for DispatchOutcome {
    fn from(result: WorkflowResult) -> Self {
        if result.success {
            return DispatchOutcome::Succeeded { data: result.data };
        }
        let can_retry = result.can_retry();
        DispatchOutcome::ReportedFailure {
            message: result.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            can_retry,
        }
    }
}

/// The state change chosen by the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Complete {
        data: Option<serde_json::Value>,
    },
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: String,
    },
    Fail {
        error: String,
    },
}

impl Transition {
    /// Status the task ends up in.
    pub fn status(&self) -> TaskStatus {
        match self {
            Transition::Complete { .. } => TaskStatus::Completed,
            Transition::Retry { .. } => TaskStatus::Retrying,
            Transition::Fail { .. } => TaskStatus::Failed,
        }
    }

    /// Write this transition into `task`, stamping `updated_at = now`.
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        task.status = self.status();
        task.updated_at = now;
        match self {
            Transition::Complete { data } => {
                task.result = data;
                task.next_retry_at = None;
            }
            Transition::Retry {
                retry_count,
                next_retry_at,
                error,
            } => {
                task.retry_count = retry_count;
                task.next_retry_at = Some(next_retry_at);
                task.error = Some(error);
            }
            Transition::Fail { error } => {
                task.error = Some(error);
                task.next_retry_at = None;
            }
        }
    }
}

/// Exponential backoff: the n-th retry waits `backoff_base_secs ^ n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_secs: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base_secs: u64) -> Self {
        Self { backoff_base_secs }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.backoff_base_secs)
    }

    /// Delay before the `retry`-th retry (1-based). Saturates instead of overflowing.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let secs = self.backoff_base_secs.checked_pow(retry).unwrap_or(u64::MAX);
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    /// Decide the next state for a task that had `retry_count` retries consumed.
    pub fn decide(
        &self,
        outcome: DispatchOutcome,
        retry_count: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Transition {
        let (message, can_retry) = match outcome {
            DispatchOutcome::Succeeded { data } => return Transition::Complete { data },
            DispatchOutcome::NotRegistered => {
                return Transition::Fail {
                    error: NOT_REGISTERED.to_string(),
                };
            }
            DispatchOutcome::ReportedFailure { message, can_retry } => (message, can_retry),
            DispatchOutcome::ThrownError { message } => (message, true),
        };

        if can_retry && retry_count < max_retries {
            let retry_count = retry_count + 1;
            let next_retry_at = now
                .checked_add_signed(self.backoff_delay(retry_count))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            Transition::Retry {
                retry_count,
                next_retry_at,
                error: message,
            }
        } else {
            Transition::Fail { error: message }
        }
    }
}
