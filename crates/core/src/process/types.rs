use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a supervised transcoder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Idle => "IDLE",
            ProcessStatus::Starting => "STARTING",
            ProcessStatus::Running => "RUNNING",
            ProcessStatus::Stopping => "STOPPING",
            ProcessStatus::Error => "ERROR",
        }
    }

    /// Statuses in which an OS process id may be recorded.
    pub fn allows_pid(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ProcessStatus::Idle),
            "STARTING" => Ok(ProcessStatus::Starting),
            "RUNNING" => Ok(ProcessStatus::Running),
            "STOPPING" => Ok(ProcessStatus::Stopping),
            "ERROR" => Ok(ProcessStatus::Error),
            other => Err(format!("unknown process status: {}", other)),
        }
    }
}

/// Health counters sampled from a running process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// CPU usage of the process in percent of one core.
    pub cpu_usage: f32,
    /// Resident memory in bytes.
    pub memory_usage: u64,
    /// Output bandwidth in kbit/s, from progress lines.
    pub network_bandwidth_kbps: f64,
}

/// Restart and health-check policy attached to a process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_delay_ms: 1000,
            health_check_interval_ms: 5000,
        }
    }
}

/// Supervision record for a channel's transcoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProcess {
    pub id: String,
    pub channel_id: String,
    /// Present only while the OS process is alive.
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub input_source: String,
    pub output_targets: Vec<String>,
    pub health: HealthMetrics,
    pub error_count: u32,
    pub recovery: RecoveryPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a process record.
#[derive(Debug, Clone)]
pub struct NewStreamProcess {
    pub channel_id: String,
    pub input_source: String,
    pub output_targets: Vec<String>,
    pub recovery: RecoveryPolicy,
}
