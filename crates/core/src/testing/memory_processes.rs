//! In-memory stream process repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::process::{
    HealthMetrics, NewStreamProcess, ProcessStatus, ProcessStoreError, StreamProcess,
    StreamProcessRepository,
};

/// In-memory implementation of [`StreamProcessRepository`] with the same
/// invariants as the SQLite store: one record per channel, pid only while
/// alive, heartbeats only while running.
#[derive(Default)]
pub struct InMemoryStreamProcessRepository {
    processes: Arc<RwLock<HashMap<String, StreamProcess>>>,
    /// If set, the next call fails with this error.
    next_error: Arc<RwLock<Option<ProcessStoreError>>>,
}

impl InMemoryStreamProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: ProcessStoreError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn all(&self) -> Vec<StreamProcess> {
        self.processes.read().await.values().cloned().collect()
    }

    async fn check_error(&self) -> Result<(), ProcessStoreError> {
        match self.next_error.write().await.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn modify<F>(&self, id: &str, apply: F) -> Result<StreamProcess, ProcessStoreError>
    where
        F: FnOnce(&mut StreamProcess),
    {
        self.check_error().await?;
        let mut processes = self.processes.write().await;
        let process = processes
            .get_mut(id)
            .ok_or_else(|| ProcessStoreError::NotFound(id.to_string()))?;
        apply(process);
        process.updated_at = Utc::now();
        Ok(process.clone())
    }
}

#[async_trait]
impl StreamProcessRepository for InMemoryStreamProcessRepository {
    async fn create(&self, request: NewStreamProcess) -> Result<StreamProcess, ProcessStoreError> {
        self.check_error().await?;
        let mut processes = self.processes.write().await;
        if processes.values().any(|p| p.channel_id == request.channel_id) {
            return Err(ProcessStoreError::AlreadyExists(request.channel_id));
        }

        let now = Utc::now();
        let process = StreamProcess {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: request.channel_id,
            pid: None,
            status: ProcessStatus::Idle,
            start_time: None,
            last_heartbeat: None,
            input_source: request.input_source,
            output_targets: request.output_targets,
            health: HealthMetrics::default(),
            error_count: 0,
            recovery: request.recovery,
            created_at: now,
            updated_at: now,
        };
        processes.insert(process.id.clone(), process.clone());
        Ok(process)
    }

    async fn find_by_id(&self, id: &str) -> Result<StreamProcess, ProcessStoreError> {
        self.check_error().await?;
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessStoreError::NotFound(id.to_string()))
    }

    async fn find_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<StreamProcess>, ProcessStoreError> {
        self.check_error().await?;
        Ok(self
            .processes
            .read()
            .await
            .values()
            .find(|p| p.channel_id == channel_id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        pid: Option<u32>,
    ) -> Result<StreamProcess, ProcessStoreError> {
        self.modify(id, |process| {
            process.status = status;
            process.pid = pid.filter(|_| status.allows_pid());
            if status == ProcessStatus::Running {
                let now = Utc::now();
                process.start_time = Some(now);
                process.last_heartbeat = Some(now);
            }
        })
        .await
    }

    async fn update_io(
        &self,
        id: &str,
        input_source: &str,
        output_targets: &[String],
    ) -> Result<StreamProcess, ProcessStoreError> {
        self.modify(id, |process| {
            process.input_source = input_source.to_string();
            process.output_targets = output_targets.to_vec();
        })
        .await
    }

    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), ProcessStoreError> {
        self.modify(id, |process| {
            if process.status == ProcessStatus::Running {
                process.last_heartbeat = Some(at);
            }
        })
        .await
        .map(|_| ())
    }

    async fn update_health_metrics(
        &self,
        id: &str,
        metrics: HealthMetrics,
    ) -> Result<(), ProcessStoreError> {
        self.modify(id, |process| process.health = metrics)
            .await
            .map(|_| ())
    }

    async fn increment_error_count(&self, id: &str) -> Result<u32, ProcessStoreError> {
        self.modify(id, |process| process.error_count += 1)
            .await
            .map(|p| p.error_count)
    }

    async fn reset_error_count(&self, id: &str) -> Result<(), ProcessStoreError> {
        self.modify(id, |process| process.error_count = 0)
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<(), ProcessStoreError> {
        self.check_error().await?;
        match self.processes.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(ProcessStoreError::NotFound(id.to_string())),
        }
    }

    async fn delete_by_channel_id(&self, channel_id: &str) -> Result<bool, ProcessStoreError> {
        self.check_error().await?;
        let mut processes = self.processes.write().await;
        let before = processes.len();
        processes.retain(|_, p| p.channel_id != channel_id);
        Ok(processes.len() < before)
    }

    async fn find_stale_processes(
        &self,
        timeout: Duration,
    ) -> Result<Vec<StreamProcess>, ProcessStoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self
            .get_running_processes()
            .await?
            .into_iter()
            .filter(|p| p.last_heartbeat.map_or(true, |hb| hb < cutoff))
            .collect())
    }

    async fn get_running_processes(&self) -> Result<Vec<StreamProcess>, ProcessStoreError> {
        self.check_error().await?;
        Ok(self
            .processes
            .read()
            .await
            .values()
            .filter(|p| p.status == ProcessStatus::Running)
            .cloned()
            .collect())
    }
}
