use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action applied to every channel of a bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOperationType {
    Start,
    Stop,
    Restart,
    Delete,
}

impl BulkOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperationType::Start => "START",
            BulkOperationType::Stop => "STOP",
            BulkOperationType::Restart => "RESTART",
            BulkOperationType::Delete => "DELETE",
        }
    }

    /// Operations that bring transcoders up and so count against the
    /// process budget.
    pub fn spawns_processes(&self) -> bool {
        matches!(self, BulkOperationType::Start | BulkOperationType::Restart)
    }
}

impl fmt::Display for BulkOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkOperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "START" => Ok(BulkOperationType::Start),
            "STOP" => Ok(BulkOperationType::Stop),
            "RESTART" => Ok(BulkOperationType::Restart),
            "DELETE" => Ok(BulkOperationType::Delete),
            other => Err(format!("unknown bulk operation: {}", other)),
        }
    }
}

/// Aggregate status of a bulk operation.
///
/// `Failed` means the operation as a whole never ran (e.g. a lock
/// conflict); per-channel failures still end in `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkStatus::Pending => "PENDING",
            BulkStatus::InProgress => "IN_PROGRESS",
            BulkStatus::Completed => "COMPLETED",
            BulkStatus::Failed => "FAILED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, BulkStatus::Completed | BulkStatus::Failed)
    }
}

impl fmt::Display for BulkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one channel inside a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelResultStatus {
    Success,
    Failed,
    /// Never attempted because the operation failed as a whole.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOperationResult {
    pub channel_id: String,
    pub status: ChannelResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChannelOperationResult {
    pub fn success(channel_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            status: ChannelResultStatus::Success,
            error: None,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn failed(channel_id: String, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            channel_id,
            status: ChannelResultStatus::Failed,
            error: Some(error),
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn skipped(channel_id: String, reason: &str) -> Self {
        Self {
            channel_id,
            status: ChannelResultStatus::Skipped,
            error: Some(reason.to_string()),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChannelResultStatus::Success
    }
}

/// A client's bulk request as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationRequest {
    pub operation: BulkOperationType,
    pub channel_ids: Vec<String>,
    /// Overrides the plan priority (1..=10).
    #[serde(default)]
    pub priority: Option<u8>,
}

impl BulkOperationRequest {
    pub fn new(operation: BulkOperationType, channel_ids: Vec<String>) -> Self {
        Self {
            operation,
            channel_ids,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Pollable aggregate state of a bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    pub client_id: String,
    pub operation: BulkOperationType,
    pub channel_ids: Vec<String>,
    pub priority: u8,
    pub status: BulkStatus,
    pub results: Vec<ChannelOperationResult>,
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkOperationResult {
    pub(crate) fn pending(
        operation_id: String,
        client_id: String,
        operation: BulkOperationType,
        channel_ids: Vec<String>,
        priority: u8,
    ) -> Self {
        Self {
            operation_id,
            client_id,
            operation,
            channel_ids,
            priority,
            status: BulkStatus::Pending,
            results: Vec::new(),
            success_count: 0,
            failure_count: 0,
            conflicting_channels: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Replace the results and recount.
    pub(crate) fn set_results(&mut self, results: Vec<ChannelOperationResult>) {
        self.success_count = results.iter().filter(|r| r.is_success()).count();
        self.failure_count = results.len() - self.success_count;
        self.results = results;
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Availability {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}
