//! In-memory task store — the single owner of every submitted task.
//! Append-only from the caller's side; only the scheduler loop mutates records.
//! Nothing is persisted and nothing is evicted unless `purge_finished` is called.
//! The lock is a std `Mutex`: it is never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tasks::{Task, TaskStatus};

/// In-memory task store, ordered by submission.
#[derive(Default)]
pub struct TaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        // Poisoning only means a caller's update closure panicked; the Vec itself is intact.
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a pending task and append it. Returns the new task ID.
    pub fn submit(&self, task_type: &str, payload: serde_json::Value, max_retries: u32) -> String {
        let task = Task::new(task_type, payload, max_retries, Utc::now());
        let id = task.id.clone();
        tracing::info!("📥 Task submitted: {} ({}, max_retries={})", id, task_type, max_retries);
        self.lock().push(task);
        id
    }

    /// All dispatchable tasks whose retry gate has passed, in submission order.
    pub fn eligible(&self, now: DateTime<Utc>) -> Vec<Task> {
        self.lock()
            .iter()
            .filter(|t| t.is_eligible(now))
            .cloned()
            .collect()
    }

    /// Atomically move an eligible task to `Running` and return a snapshot of it.
    /// Returns `None` if the task is gone or no longer eligible at `now`, so the
    /// same task is never dispatched twice.
    pub(crate) fn claim(&self, id: &str, now: DateTime<Utc>) -> Option<Task> {
        let mut tasks = self.lock();
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        if !task.is_eligible(now) {
            return None;
        }
        task.status = TaskStatus::Running;
        task.next_retry_at = None;
        task.updated_at = now;
        Some(task.clone())
    }

    /// Apply `f` to a task that is still eligible at `now`, without passing through
    /// `Running`. Used for tasks that are settled without being dispatched.
    pub(crate) fn update_if_eligible<F>(&self, id: &str, now: DateTime<Utc>, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.lock();
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        if !task.is_eligible(now) {
            return None;
        }
        f(task);
        Some(task.clone())
    }

    /// Apply `f` to a non-terminal task. Terminal tasks are never touched again.
    pub(crate) fn update<F>(&self, id: &str, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.lock();
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        if task.status.is_terminal() {
            tracing::warn!("⚠️ Refusing to mutate terminal task {} ({})", task.id, task.status);
            return None;
        }
        f(task);
        Some(task.clone())
    }

    /// Get a snapshot of a task by ID.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Snapshot of all tasks in submission order.
    pub fn list(&self) -> Vec<Task> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of tasks in each status.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.lock().iter() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Retrying => counts.retrying += 1,
            }
        }
        counts
    }

    /// Remove and return every `Completed`/`Failed` task.
    /// Never called by the scheduler itself; long-running hosts archive with it.
    pub fn purge_finished(&self) -> Vec<Task> {
        let mut tasks = self.lock();
        let (finished, live): (Vec<Task>, Vec<Task>) =
            tasks.drain(..).partition(|t| t.status.is_terminal());
        *tasks = live;
        if !finished.is_empty() {
            tracing::info!("🧹 Purged {} finished tasks", finished.len());
        }
        finished
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.retrying
    }
}
