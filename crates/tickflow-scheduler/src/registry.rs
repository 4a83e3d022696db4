//! Workflow Registry — maps a task type to the workflow that handles it.
//! Guarded by a std `RwLock`; lookups clone the `Arc` out, so no guard outlives a call.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::workflow::Workflow;

/// Registry of all available workflows, keyed by `Workflow::name`.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<dyn Workflow>>>,
}

impl WorkflowRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow. A workflow already bound to the same name is replaced.
    pub fn register(&self, workflow: Arc<dyn Workflow>) {
        let name = workflow.name().to_string();
        let previous = self
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), workflow);
        if previous.is_some() {
            tracing::warn!("🔁 Workflow '{}' re-registered, previous binding replaced", name);
        } else {
            tracing::info!("🧩 Registered workflow: {}", name);
        }
    }

    /// Get the workflow for a task type.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_type)
    }

    /// Remove a binding. Tasks of that type fail on their next dispatch.
    pub fn unregister(&self, name: &str) -> bool {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Total number of registered workflows.
    pub fn count(&self) -> usize {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
