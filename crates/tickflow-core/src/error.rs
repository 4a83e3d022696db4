//! Error type shared by every Tickflow crate.

use thiserror::Error;

/// Errors raised by the scheduler, its configuration, and bundled workflows.
#[derive(Debug, Error)]
pub enum TickflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised from inside a workflow invocation.
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// An external command could not be spawned or exited unsuccessfully.
    #[error("Process error: {0}")]
    Process(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TickflowError>;
