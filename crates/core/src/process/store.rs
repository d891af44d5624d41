use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{HealthMetrics, NewStreamProcess, ProcessStatus, StreamProcess};

/// Errors from process-record persistence.
#[derive(Debug, Error)]
pub enum ProcessStoreError {
    #[error("Stream process not found: {0}")]
    NotFound(String),

    #[error("Stream process already exists for channel: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ProcessStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessStoreError::NotFound(_))
    }
}

/// Persistent store of stream process records, at most one per channel.
#[async_trait]
pub trait StreamProcessRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the channel already has a record.
    async fn create(&self, request: NewStreamProcess) -> Result<StreamProcess, ProcessStoreError>;

    async fn find_by_id(&self, id: &str) -> Result<StreamProcess, ProcessStoreError>;

    async fn find_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<StreamProcess>, ProcessStoreError>;

    /// Set status and pid.
    ///
    /// The pid is stored only for `Starting`/`Running` and cleared otherwise.
    /// Entering `Running` records the start time.
    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        pid: Option<u32>,
    ) -> Result<StreamProcess, ProcessStoreError>;

    /// Replace the input/output description used for the next spawn.
    async fn update_io(
        &self,
        id: &str,
        input_source: &str,
        output_targets: &[String],
    ) -> Result<StreamProcess, ProcessStoreError>;

    /// Ignored unless the process is `Running`.
    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), ProcessStoreError>;

    async fn update_health_metrics(
        &self,
        id: &str,
        metrics: HealthMetrics,
    ) -> Result<(), ProcessStoreError>;

    /// Returns the new error count.
    async fn increment_error_count(&self, id: &str) -> Result<u32, ProcessStoreError>;

    async fn reset_error_count(&self, id: &str) -> Result<(), ProcessStoreError>;

    async fn delete(&self, id: &str) -> Result<(), ProcessStoreError>;

    /// Returns whether a record was removed.
    async fn delete_by_channel_id(&self, channel_id: &str) -> Result<bool, ProcessStoreError>;

    /// Running processes whose last heartbeat is older than `timeout`.
    async fn find_stale_processes(
        &self,
        timeout: Duration,
    ) -> Result<Vec<StreamProcess>, ProcessStoreError>;

    async fn get_running_processes(&self) -> Result<Vec<StreamProcess>, ProcessStoreError>;
}
