//! # Tickflow Core
//!
//! Shared error type and configuration for the Tickflow crates.

pub mod config;
pub mod error;

pub use config::{CodeCheckConfig, NotifyConfig, SchedulerConfig, TickflowConfig};
pub use error::{Result, TickflowError};
