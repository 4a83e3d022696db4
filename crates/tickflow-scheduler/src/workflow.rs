//! Workflow contract — the only interface the scheduler needs from task handlers.
//!
//! A workflow is any async capability registered under a name. Tasks whose
//! `task_type` matches that name are handed to it one at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tickflow_core::Result;

use crate::tasks::Task;

/// What a workflow reports back for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `None` means retryable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
}

impl WorkflowResult {
    /// Successful run with no data.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Successful run carrying result data.
    pub fn ok_with(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    /// Failure the scheduler may retry.
    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            can_retry: Some(true),
            ..Default::default()
        }
    }

    /// Failure that ends the task immediately.
    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            can_retry: Some(false),
            ..Default::default()
        }
    }

    pub fn can_retry(&self) -> bool {
        self.can_retry.unwrap_or(true)
    }
}

/// A named task handler.
///
/// Returning `Err` is treated like a retryable failure, and so is a panic inside
/// `execute`. Neither ever reaches the scheduler loop.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Registry key; tasks with this `task_type` are routed here.
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task) -> Result<WorkflowResult>;
}
