//! Channel repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{Channel, ChannelStatus, ChannelUpdate, NewChannel};

/// Errors from channel persistence.
#[derive(Debug, Error)]
pub enum ChannelStoreError {
    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ChannelStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChannelStoreError::NotFound(_))
    }
}

/// Persistent store of channel records.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create(&self, request: NewChannel) -> Result<Channel, ChannelStoreError>;

    /// Fails with `NotFound` if the channel does not exist.
    async fn find_by_id(&self, id: &str) -> Result<Channel, ChannelStoreError>;

    /// Channels owned by a client, oldest first.
    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Channel>, ChannelStoreError>;

    /// Persist a name/configuration update.
    async fn update(&self, id: &str, update: &ChannelUpdate) -> Result<Channel, ChannelStoreError>;

    /// Set the status.
    ///
    /// Entering `Live` records `at` as `last_start_time`; entering `Stopped`
    /// records it as `last_stop_time`.
    async fn update_status(
        &self,
        id: &str,
        status: ChannelStatus,
        at: DateTime<Utc>,
    ) -> Result<Channel, ChannelStoreError>;

    /// Add `additional_secs` to the accumulated uptime.
    async fn update_uptime(&self, id: &str, additional_secs: u64)
        -> Result<Channel, ChannelStoreError>;

    async fn increment_restart_count(&self, id: &str) -> Result<Channel, ChannelStoreError>;

    async fn delete(&self, id: &str) -> Result<(), ChannelStoreError>;
}
