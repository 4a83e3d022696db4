//! # Tickflow Scheduler
//!
//! In-process task scheduler with named workflows and exponential-backoff retries.
//! No broker, no database: tasks live in memory for the life of the engine.
//!
//! ## Architecture
//! ```text
//! caller ── register_workflow ──▶ WorkflowRegistry
//!        ── submit_task ────────▶ TaskStore (append-only for callers)
//!
//! SchedulerEngine loop (every poll interval)
//!   ├── TaskStore.eligible(now)          PENDING / RETRYING past their gate
//!   ├── for each, in submission order:
//!   │     WorkflowRegistry.get(type) → Workflow.execute(task).await
//!   │     → DispatchOutcome → RetryPolicy.decide → Transition → TaskStore
//!   └── sleep
//! ```

pub mod engine;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use engine::{SchedulerEngine, TickReport};
pub use registry::WorkflowRegistry;
pub use retry::{DispatchOutcome, NOT_REGISTERED, RetryPolicy, Transition};
pub use store::{StatusCounts, TaskStore};
pub use tasks::{Task, TaskStatus};
pub use workflow::{Workflow, WorkflowResult};
