use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::process::{HealthMetrics, ProcessStatus};

/// Health report for one channel's transcoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamHealth {
    pub channel_id: String,
    pub process_id: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    /// Seconds since the process entered RUNNING; zero otherwise.
    pub uptime_secs: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub restart_attempts: u32,
    pub error_count: u32,
    pub health: HealthMetrics,
}
