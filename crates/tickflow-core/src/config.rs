//! Tickflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TickflowError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickflowConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub code_check: CodeCheckConfig,
}

impl TickflowConfig {
    /// Load config from the default path (~/.tickflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TickflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TickflowError::Config(format!("Failed to parse config: {e}")))?;
        config.scheduler.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TickflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tickflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tickflow")
    }
}

/// Scheduler loop and retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sleep between ticks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Retry ceiling for tasks submitted without an explicit one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// The n-th retry waits `backoff_base_secs ^ n` seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

fn default_poll_interval_ms() -> u64 { 1000 }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_base_secs() -> u64 { 2 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings that would busy-loop or never back off.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TickflowError::Config(
                "scheduler.poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.backoff_base_secs < 2 {
            return Err(TickflowError::Config(format!(
                "scheduler.backoff_base_secs must be at least 2 (got {})",
                self.backoff_base_secs
            )));
        }
        Ok(())
    }
}

/// Webhook notification workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Target URL; when unset notifications are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_notify_timeout_secs() -> u64 { 30 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout_secs(),
            headers: Vec::new(),
        }
    }
}

/// Repository code-check workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCheckConfig {
    /// Where repositories are cloned.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Formatter command line run in the checkout, e.g. `"black ."`.
    #[serde(default)]
    pub formatter: Option<String>,
    /// Linter command line run in the checkout, e.g. `"pylint --recursive=y ."`.
    #[serde(default)]
    pub linter: Option<String>,
    /// Commit formatter changes to a fresh local branch.
    #[serde(default)]
    pub commit_fixes: bool,
}

fn default_work_dir() -> String { "~/.tickflow/repos".into() }

impl Default for CodeCheckConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            formatter: None,
            linter: None,
            commit_fixes: false,
        }
    }
}
