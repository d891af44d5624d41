use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard cap on channels per bulk request.
pub const MAX_BATCH_CAP: usize = 50;

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// How long finished operation results stay pollable.
    #[serde(default = "default_result_retention_secs")]
    pub result_retention_secs: u64,
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_CAP
}

fn default_result_retention_secs() -> u64 {
    3600
}

fn default_dispatch_interval_ms() -> u64 {
    250
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            result_retention_secs: default_result_retention_secs(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }
}
