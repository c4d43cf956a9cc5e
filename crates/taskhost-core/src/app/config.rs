//! TaskServiceConfig - tunables of the orchestrator.
//!
//! ```json
//! { "idle_grace_period_ms": 2000, "max_execution_time_ms": 15000, "loader_options": {} }
//! ```
//! Every field is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TaskOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskServiceConfig {
    /// Quiet time after a tenant's last event before it is invalidated.
    pub idle_grace_period_ms: u64,

    /// Budget the OS grants one job invocation.
    pub max_execution_time_ms: u64,

    /// Passed verbatim to the tenant loader.
    pub loader_options: TaskOptions,
}

impl Default for TaskServiceConfig {
    fn default() -> Self {
        Self {
            idle_grace_period_ms: 2_000,
            max_execution_time_ms: 15_000,
            loader_options: TaskOptions::new(),
        }
    }
}

impl TaskServiceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_idle_grace_period(mut self, period: Duration) -> Self {
        self.idle_grace_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_max_execution_time(mut self, budget: Duration) -> Self {
        self.max_execution_time_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_loader_options(mut self, options: TaskOptions) -> Self {
        self.loader_options = options;
        self
    }

    pub fn idle_grace_period(&self) -> Duration {
        Duration::from_millis(self.idle_grace_period_ms)
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}
