//! # Tickflow Workflows
//!
//! Ready-made workflows for the Tickflow scheduler. Each one implements the
//! `Workflow` contract and knows nothing about the loop that drives it.
//!
//! - `send-notification` — POST a notification to a webhook.
//! - `code-optimizer` — clone a repository, run a formatter and linter, report a score.

pub mod code_check;
pub mod notify;

pub use code_check::CodeCheckWorkflow;
pub use notify::NotifyWorkflow;
