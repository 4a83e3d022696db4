//! Scheduler Engine — the tick loop that dispatches eligible tasks to workflows.
//!
//! One loop per engine. Each tick dispatches every eligible task in submission
//! order, awaiting each workflow before moving on, then sleeps for the poll
//! interval. A slow workflow therefore delays everything behind it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use serde::Serialize;
use tickflow_core::SchedulerConfig;
use tokio::task::JoinHandle;

use crate::registry::WorkflowRegistry;
use crate::retry::{DispatchOutcome, RetryPolicy, Transition};
use crate::store::{StatusCounts, TaskStore};
use crate::tasks::{Task, TaskStatus};
use crate::workflow::Workflow;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tasks handed to a workflow.
    pub dispatched: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, settled: Settled) {
        if settled.invoked {
            self.dispatched += 1;
        }
        match settled.status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Retrying => self.retried += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
}

/// Result of settling one eligible task.
#[derive(Debug, Clone, Copy)]
struct Settled {
    status: TaskStatus,
    /// False when the task failed without reaching a workflow.
    invoked: bool,
}

/// The scheduler engine — owns the task store and workflow registry and drives
/// every task state change after submission.
pub struct SchedulerEngine {
    store: TaskStore,
    registry: WorkflowRegistry,
    policy: RetryPolicy,
    poll_interval: Duration,
    default_max_retries: u32,
    running: AtomicBool,
    /// Bumped on every `start`; a loop exits once it no longer owns the current value.
    generation: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SchedulerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerEngine {
    /// Create an engine with a 1s poll interval and 2^n second backoff.
    pub fn new() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            store: TaskStore::new(),
            registry: WorkflowRegistry::new(),
            policy: RetryPolicy::from_config(config),
            poll_interval: config.poll_interval(),
            default_max_retries: config.default_max_retries,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            handle: Mutex::new(None),
        }
    }

    /// Override the sleep between ticks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Read access to the task store.
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Register a workflow under its name, replacing any previous binding.
    pub fn register_workflow(&self, workflow: Arc<dyn Workflow>) {
        self.registry.register(workflow);
    }

    /// Enqueue a task. Returns its ID immediately.
    pub fn submit_task(&self, task_type: &str, payload: serde_json::Value, max_retries: u32) -> String {
        self.store.submit(task_type, payload, max_retries)
    }

    /// Enqueue a task with the configured default retry ceiling (3 unless overridden).
    pub fn submit_task_default(&self, task_type: &str, payload: serde_json::Value) -> String {
        self.store.submit(task_type, payload, self.default_max_retries)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.store.get(id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.store.list()
    }

    pub fn counts(&self) -> StatusCounts {
        self.store.counts()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the tick loop on the current tokio runtime.
    /// Returns `false` without doing anything if the loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already running, start() ignored");
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        // A loop from an earlier start() may still be finishing its last tick.
        let previous = slot.take();
        let engine = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            if let Some(previous) = previous
                && let Err(e) = previous.await
            {
                tracing::warn!("⚠️ Previous scheduler loop ended abnormally: {e}");
            }
            run_loop(engine, generation).await;
        }));

        tracing::info!(
            "⏰ Scheduler started (poll every {}ms)",
            self.poll_interval.as_millis()
        );
        true
    }

    /// Ask the loop to exit at its next tick boundary. An in-flight workflow is not interrupted.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("🛑 Scheduler stopping");
        }
    }

    /// `stop()`, then wait for the loop to finish its current tick and exit.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("⚠️ Scheduler loop ended abnormally: {e}");
        }
        tracing::info!("🛑 Scheduler stopped");
    }

    fn owns_loop(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Run one tick against the wall clock.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the clock read `now`: dispatch every task eligible at
    /// `now`, one after another.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let eligible = self.store.eligible(now);
        if eligible.is_empty() {
            return report;
        }
        tracing::debug!("Tick: {} eligible task(s)", eligible.len());

        for task in eligible {
            if let Some(settled) = self.dispatch(&task, now).await {
                report.record(settled);
            }
        }
        report
    }

    /// Dispatch one task and settle it. Returns `None` if the task was no longer
    /// eligible when we got to it.
    async fn dispatch(&self, task: &Task, now: DateTime<Utc>) -> Option<Settled> {
        let Some(workflow) = self.registry.get(&task.task_type) else {
            tracing::error!("❌ No workflow found for type: {}", task.task_type);
            let transition = self.policy.decide(
                DispatchOutcome::NotRegistered,
                task.retry_count,
                task.max_retries,
                now,
            );
            let settled = self
                .store
                .update_if_eligible(&task.id, now, |t| transition.apply(t, now))?;
            return Some(Settled {
                status: settled.status,
                invoked: false,
            });
        };

        let claimed = self.store.claim(&task.id, now)?;
        tracing::info!(
            "⚙️ Processing task {} ({}), attempt {}/{}",
            claimed.id,
            claimed.task_type,
            claimed.retry_count + 1,
            claimed.max_retries + 1
        );

        let started = Instant::now();
        let outcome = invoke(workflow.as_ref(), &claimed).await;
        let finished_at = now + TimeDelta::from_std(started.elapsed()).unwrap_or_default();

        let transition =
            self.policy
                .decide(outcome, claimed.retry_count, claimed.max_retries, finished_at);
        log_transition(&claimed, &transition, finished_at);
        let settled = self
            .store
            .update(&claimed.id, |t| transition.apply(t, finished_at))?;
        Some(Settled {
            status: settled.status,
            invoked: true,
        })
    }
}

/// Call the workflow and fold its three failure paths into one outcome.
async fn invoke(workflow: &dyn Workflow, task: &Task) -> DispatchOutcome {
    match AssertUnwindSafe(workflow.execute(task)).catch_unwind().await {
        Ok(Ok(result)) => DispatchOutcome::from(result),
        Ok(Err(e)) => DispatchOutcome::ThrownError {
            message: e.to_string(),
        },
        Err(panic) => DispatchOutcome::ThrownError {
            message: panic_message(panic.as_ref()),
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("workflow panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("workflow panicked: {s}")
    } else {
        "workflow panicked".to_string()
    }
}

fn log_transition(task: &Task, transition: &Transition, at: DateTime<Utc>) {
    match transition {
        Transition::Complete { .. } => {
            tracing::info!("✅ Task {} COMPLETED", task.id);
        }
        Transition::Retry {
            retry_count,
            next_retry_at,
            error,
        } => {
            tracing::warn!("⚠️ Task {} failed: {}", task.id, error);
            tracing::info!(
                "🔄 Scheduling retry {}/{} for {} in {}s",
                retry_count,
                task.max_retries,
                task.id,
                (*next_retry_at - at).num_seconds()
            );
        }
        Transition::Fail { error } => {
            tracing::warn!("⚠️ Task {} failed: {}", task.id, error);
            tracing::error!("❌ Task {} FAILED permanently", task.id);
        }
    }
}

/// The loop body spawned by `start()`. Exits at a tick boundary once `stop()` is
/// called or a newer `start()` takes over.
async fn run_loop(engine: Arc<SchedulerEngine>, generation: u64) {
    tracing::debug!("Scheduler loop #{} running", generation);
    while engine.owns_loop(generation) {
        let report = engine.tick().await;
        if report.dispatched > 0 || report.failed > 0 {
            tracing::debug!(
                "Tick done: {} dispatched, {} completed, {} retrying, {} failed",
                report.dispatched,
                report.completed,
                report.retried,
                report.failed
            );
        }
        tokio::time::sleep(engine.poll_interval).await;
    }
    tracing::debug!("Scheduler loop #{} exited", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NOT_REGISTERED;
    use crate::workflow::WorkflowResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tickflow_core::TickflowError;

    /// Succeeds every time.
    #[derive(Default)]
    struct AlwaysOk {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Workflow for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }

        async fn execute(&self, _task: &Task) -> tickflow_core::Result<WorkflowResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WorkflowResult::ok_with(serde_json::json!({"done": true})))
        }
    }

    /// Fails every time with the given retry flag.
    struct AlwaysFail {
        can_retry: bool,
        calls: AtomicUsize,
    }

    impl AlwaysFail {
        fn new(can_retry: bool) -> Self {
            Self {
                can_retry,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Workflow for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }

        async fn execute(&self, _task: &Task) -> tickflow_core::Result<WorkflowResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WorkflowResult {
                success: false,
                error: Some("SMTP Connection Timeout".into()),
                can_retry: Some(self.can_retry),
                data: None,
            })
        }
    }

    /// Fails on the first call, succeeds afterwards.
    #[derive(Default)]
    struct FailOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Workflow for FailOnce {
        fn name(&self) -> &str {
            "fail-once"
        }

        async fn execute(&self, _task: &Task) -> tickflow_core::Result<WorkflowResult> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(WorkflowResult::retryable("flaky"))
            } else {
                Ok(WorkflowResult::ok())
            }
        }
    }

    struct Erroring;

    #[async_trait]
    impl Workflow for Erroring {
        fn name(&self) -> &str {
            "erroring"
        }

        async fn execute(&self, _task: &Task) -> tickflow_core::Result<WorkflowResult> {
            Err(TickflowError::Workflow("connection reset".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Workflow for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _task: &Task) -> tickflow_core::Result<WorkflowResult> {
            panic!("payload missing 'to'");
        }
    }

    /// Records invocation order and the peak number of overlapping invocations.
    #[derive(Default)]
    struct Slow {
        delay_ms: u64,
        active: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Workflow for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, task: &Task) -> tickflow_core::Result<WorkflowResult> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.seen.lock().unwrap().push(task.id.clone());
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(WorkflowResult::ok())
        }
    }

    fn engine() -> Arc<SchedulerEngine> {
        Arc::new(SchedulerEngine::new().with_poll_interval(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_on_next_tick() {
        let engine = engine();
        let id = engine.submit_task("unknown-task", serde_json::json!({}), 3);

        let report = engine.tick_at(Utc::now()).await;
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.failed, 1);

        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(NOT_REGISTERED));
        assert_eq!(task.retry_count, 0);
        assert!(task.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_success_completes_on_first_tick() {
        let engine = engine();
        let wf = Arc::new(AlwaysOk::default());
        engine.register_workflow(wf.clone());
        let zero = engine.submit_task("always-ok", serde_json::Value::Null, 0);
        let many = engine.submit_task("always-ok", serde_json::Value::Null, 10);

        let report = engine.tick_at(Utc::now()).await;
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.completed, 2);

        for id in [zero, many] {
            let task = engine.get_task(&id).unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.retry_count, 0);
            assert_eq!(task.result, Some(serde_json::json!({"done": true})));
        }

        // Terminal tasks are never dispatched again.
        engine.tick_at(Utc::now() + chrono::Duration::hours(1)).await;
        assert_eq!(wf.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_schedule_until_failed() {
        let engine = engine();
        let wf = Arc::new(AlwaysFail::new(true));
        engine.register_workflow(wf.clone());
        let id = engine.submit_task("always-fail", serde_json::Value::Null, 2);

        // Attempt 1 → RETRYING(1), gated for 2s.
        engine.tick_at(Utc::now()).await;
        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error.as_deref(), Some("SMTP Connection Timeout"));
        let gate = task.next_retry_at.unwrap();
        assert_eq!(gate - task.updated_at, chrono::Duration::seconds(2));

        let just_before = gate - chrono::Duration::milliseconds(1);
        assert!(engine.store().eligible(just_before).is_empty());
        assert_eq!(engine.tick_at(just_before).await, TickReport::default());
        assert_eq!(engine.store().eligible(gate).len(), 1);

        // Attempt 2 → RETRYING(2), gated for 4s.
        engine.tick_at(gate).await;
        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.retry_count, 2);
        let gate = task.next_retry_at.unwrap();
        assert_eq!(gate - task.updated_at, chrono::Duration::seconds(4));
        assert!(engine.store().eligible(gate - chrono::Duration::milliseconds(1)).is_empty());

        // Attempt 3 → FAILED, retries exhausted.
        let report = engine.tick_at(gate).await;
        assert_eq!(report.failed, 1);
        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert!(task.next_retry_at.is_none());
        assert_eq!(wf.calls.load(Ordering::SeqCst), 3);

        engine.tick_at(gate + chrono::Duration::days(1)).await;
        assert_eq!(wf.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.get_task(&id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_fail_once_then_complete() {
        let engine = engine();
        engine.register_workflow(Arc::new(FailOnce::default()));
        let id = engine.submit_task("fail-once", serde_json::Value::Null, 3);

        engine.tick_at(Utc::now()).await;
        let gate = engine.get_task(&id).unwrap().next_retry_at.unwrap();
        engine.tick_at(gate).await;

        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_fails_immediately() {
        let engine = engine();
        engine.register_workflow(Arc::new(AlwaysFail::new(false)));
        let id = engine.submit_task("always-fail", serde_json::Value::Null, 3);

        engine.tick_at(Utc::now()).await;
        let task = engine.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let engine = engine();
        let ok = Arc::new(AlwaysOk::default());
        engine.register_workflow(Arc::new(Erroring));
        engine.register_workflow(Arc::new(Panicking));
        engine.register_workflow(ok.clone());
        let err_id = engine.submit_task("erroring", serde_json::Value::Null, 3);
        let panic_id = engine.submit_task("panicking", serde_json::Value::Null, 3);
        let ok_id = engine.submit_task("always-ok", serde_json::Value::Null, 3);

        let report = engine.tick_at(Utc::now()).await;
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.retried, 2);
        assert_eq!(report.completed, 1);

        let task = engine.get_task(&err_id).unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.error.as_deref(), Some("Workflow error: connection reset"));

        let task = engine.get_task(&panic_id).unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert!(task.error.unwrap().contains("payload missing 'to'"));

        assert_eq!(engine.get_task(&ok_id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_dispatch_is_sequential_in_submission_order() {
        let engine = engine();
        let wf = Arc::new(Slow {
            delay_ms: 5,
            ..Default::default()
        });
        engine.register_workflow(wf.clone());
        let ids: Vec<_> = (0..4)
            .map(|i| engine.submit_task("slow", serde_json::json!({"n": i}), 3))
            .collect();

        engine.tick_at(Utc::now()).await;
        assert_eq!(*wf.seen.lock().unwrap(), ids);
        assert_eq!(wf.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let engine = engine();
        let wf = Arc::new(Slow {
            delay_ms: 20,
            ..Default::default()
        });
        engine.register_workflow(wf.clone());
        for i in 0..3 {
            engine.submit_task("slow", serde_json::json!({"n": i}), 3);
        }

        assert!(engine.start());
        assert!(!engine.start());
        assert!(engine.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop_and_wait().await;
        assert!(!engine.is_running());

        assert_eq!(engine.counts().completed, 3);
        assert_eq!(wf.seen.lock().unwrap().len(), 3);
        assert_eq!(wf.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_never_overlaps_loops() {
        let engine = engine();
        let wf = Arc::new(Slow {
            delay_ms: 30,
            ..Default::default()
        });
        engine.register_workflow(wf.clone());
        for i in 0..4 {
            engine.submit_task("slow", serde_json::json!({"n": i}), 3);
        }

        assert!(engine.start());
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.stop();
        assert!(engine.start());

        tokio::time::sleep(Duration::from_millis(250)).await;
        engine.stop_and_wait().await;

        assert_eq!(engine.counts().completed, 4);
        assert_eq!(wf.seen.lock().unwrap().len(), 4);
        assert_eq!(wf.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_task_finish() {
        let engine = engine();
        engine.register_workflow(Arc::new(Slow {
            delay_ms: 60,
            ..Default::default()
        }));
        let id = engine.submit_task("slow", serde_json::Value::Null, 3);

        engine.start();
        // Paused clock: the loop claims the task, then this sleep fires long before
        // the workflow's 60ms one.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.get_task(&id).unwrap().status, TaskStatus::Running);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(engine.get_task(&id).unwrap().status, TaskStatus::Running);

        engine.stop_and_wait().await;
        assert_eq!(engine.get_task(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_submit_task_default_uses_config() {
        let config = SchedulerConfig {
            default_max_retries: 5,
            ..Default::default()
        };
        let engine = SchedulerEngine::from_config(&config);
        let id = engine.submit_task_default("always-ok", serde_json::Value::Null);
        assert_eq!(engine.get_task(&id).unwrap().max_retries, 5);
        assert_eq!(SchedulerEngine::new().poll_interval(), Duration::from_secs(1));
    }
}
