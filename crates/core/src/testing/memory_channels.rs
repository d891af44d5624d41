//! In-memory channel repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::channel::{
    Channel, ChannelRepository, ChannelStatus, ChannelStoreError, ChannelUpdate, NewChannel,
};

/// In-memory implementation of [`ChannelRepository`].
///
/// Keeps insertion order so `find_by_client_id` is oldest first, like the
/// SQLite store.
#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    order: Arc<RwLock<Vec<String>>>,
    /// If set, the next call fails with this error.
    next_error: Arc<RwLock<Option<ChannelStoreError>>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a channel as-is, keeping its id and status.
    pub async fn insert(&self, channel: Channel) {
        let id = channel.id.clone();
        if self.channels.write().await.insert(id.clone(), channel).is_none() {
            self.order.write().await.push(id);
        }
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: ChannelStoreError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn check_error(&self) -> Result<(), ChannelStoreError> {
        match self.next_error.write().await.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn modify<F>(&self, id: &str, apply: F) -> Result<Channel, ChannelStoreError>
    where
        F: FnOnce(&mut Channel),
    {
        self.check_error().await?;
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| ChannelStoreError::NotFound(id.to_string()))?;
        apply(channel);
        channel.updated_at = Utc::now();
        Ok(channel.clone())
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn create(&self, request: NewChannel) -> Result<Channel, ChannelStoreError> {
        self.check_error().await?;
        let now = Utc::now();
        let channel = Channel {
            id: request
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            client_id: request.client_id,
            name: request.name,
            status: ChannelStatus::Stopped,
            config: request.config,
            hls_endpoint: request.hls_endpoint,
            total_uptime_secs: 0,
            restart_count: 0,
            last_start_time: None,
            last_stop_time: None,
            created_at: now,
            updated_at: now,
        };
        self.insert(channel.clone()).await;
        Ok(channel)
    }

    async fn find_by_id(&self, id: &str) -> Result<Channel, ChannelStoreError> {
        self.check_error().await?;
        self.channels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChannelStoreError::NotFound(id.to_string()))
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Channel>, ChannelStoreError> {
        self.check_error().await?;
        let channels = self.channels.read().await;
        Ok(self
            .order
            .read()
            .await
            .iter()
            .filter_map(|id| channels.get(id))
            .filter(|c| c.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn update(&self, id: &str, update: &ChannelUpdate) -> Result<Channel, ChannelStoreError> {
        self.modify(id, |channel| {
            if let Some(ref name) = update.name {
                channel.name = name.clone();
            }
            channel.config = update.apply_to(&channel.config);
        })
        .await
    }

    async fn update_status(
        &self,
        id: &str,
        status: ChannelStatus,
        at: DateTime<Utc>,
    ) -> Result<Channel, ChannelStoreError> {
        self.modify(id, |channel| {
            channel.status = status;
            match status {
                ChannelStatus::Live => channel.last_start_time = Some(at),
                ChannelStatus::Stopped => channel.last_stop_time = Some(at),
                _ => {}
            }
        })
        .await
    }

    async fn update_uptime(
        &self,
        id: &str,
        additional_secs: u64,
    ) -> Result<Channel, ChannelStoreError> {
        self.modify(id, |channel| {
            channel.total_uptime_secs = channel.total_uptime_secs.saturating_add(additional_secs);
        })
        .await
    }

    async fn increment_restart_count(&self, id: &str) -> Result<Channel, ChannelStoreError> {
        self.modify(id, |channel| channel.restart_count += 1).await
    }

    async fn delete(&self, id: &str) -> Result<(), ChannelStoreError> {
        self.check_error().await?;
        if self.channels.write().await.remove(id).is_none() {
            return Err(ChannelStoreError::NotFound(id.to_string()));
        }
        self.order.write().await.retain(|existing| existing != id);
        Ok(())
    }
}
