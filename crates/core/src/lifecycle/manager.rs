use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ChannelStatusReport, LifecycleError};
use crate::bulk::{BulkOperationType, ChannelOperationHandler, HandlerError};
use crate::channel::{
    Channel, ChannelConfig, ChannelRepository, ChannelStatus, ChannelUpdate, NewChannel,
};
use crate::events::{EventBus, StreamEvent};
use crate::planner::{StreamPlan, StreamPlanner};
use crate::process::{NewStreamProcess, ProcessStatus, StreamProcessRepository};
use crate::subscription::{PlanOperation, SubscriptionGate};
use crate::supervisor::{ConnectivityProbe, ProbeResult, ProcessSupervisor};

/// Owns the channel state machine.
///
/// `STOPPED` and `ERROR` are resting states; only `start` enters
/// `STARTING`, and only a successful spawn moves `STARTING` to `LIVE`.
/// Operations on one channel are serialized; different channels never wait
/// on each other.
pub struct ChannelLifecycleManager {
    channels: Arc<dyn ChannelRepository>,
    processes: Arc<dyn StreamProcessRepository>,
    supervisor: ProcessSupervisor,
    planner: Arc<dyn StreamPlanner>,
    gate: Arc<dyn SubscriptionGate>,
    events: EventBus,
    probe: ConnectivityProbe,
    guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChannelLifecycleManager {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        processes: Arc<dyn StreamProcessRepository>,
        supervisor: ProcessSupervisor,
        planner: Arc<dyn StreamPlanner>,
        gate: Arc<dyn SubscriptionGate>,
        events: EventBus,
        probe: ConnectivityProbe,
    ) -> Self {
        Self {
            channels,
            processes,
            supervisor,
            planner,
            gate,
            events,
            probe,
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    async fn lock_channel(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        let guard = self
            .guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id.to_string())
            .or_default()
            .clone();
        guard.lock_owned().await
    }

    pub async fn create_channel(
        &self,
        client_id: &str,
        name: &str,
        config: ChannelConfig,
    ) -> Result<Channel, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::Validation(
                "channel name must not be empty".to_string(),
            ));
        }
        if config.input_source.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "input_source must not be empty".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.planner
            .plan(&draft(&id, client_id, name, config.clone()))?;

        let existing = self.channels.find_by_client_id(client_id).await?.len() as u32;
        let decision = self
            .gate
            .check(client_id, PlanOperation::CreateChannel { existing })
            .await?;
        if !decision.allowed {
            return Err(LifecycleError::LimitExceeded(decision.reason.unwrap_or_else(|| {
                format!("channel limit of {} reached", decision.limit)
            })));
        }

        let hls_endpoint = config.hls_enabled.then(|| self.planner.hls_endpoint(&id));
        let channel = self
            .channels
            .create(NewChannel {
                id: Some(id),
                client_id: client_id.to_string(),
                name: name.to_string(),
                config,
                hls_endpoint,
            })
            .await?;

        info!(channel_id = %channel.id, client_id = %client_id, "Channel created");
        Ok(channel)
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel, LifecycleError> {
        Ok(self.channels.find_by_id(channel_id).await?)
    }

    pub async fn list_channels(&self, client_id: &str) -> Result<Vec<Channel>, LifecycleError> {
        Ok(self.channels.find_by_client_id(client_id).await?)
    }

    pub async fn get_status(&self, channel_id: &str) -> Result<ChannelStatusReport, LifecycleError> {
        let channel = self.channels.find_by_id(channel_id).await?;
        let stream = match self.supervisor.get_stream_health(channel_id).await {
            Ok(health) => Some(health),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        Ok(ChannelStatusReport { channel, stream })
    }

    /// Start streaming. Permitted from `STOPPED` or `ERROR`.
    ///
    /// Any failure after the plan check leaves the channel in `ERROR`.
    pub async fn start_channel(&self, channel_id: &str) -> Result<Channel, LifecycleError> {
        let _guard = self.lock_channel(channel_id).await;
        let channel = self.channels.find_by_id(channel_id).await?;
        if !channel.status.can_start() {
            return Err(LifecycleError::AlreadyActive(channel_id.to_string()));
        }
        self.check_concurrent_limit(&channel).await?;

        let channel = self.transition(&channel, ChannelStatus::Starting).await?;
        self.supervisor.clear_restart_attempts(channel_id).await;

        match self.launch(&channel).await {
            Ok(()) => {
                let live = self.transition(&channel, ChannelStatus::Live).await?;
                self.events.publish(StreamEvent::StreamingStarted {
                    channel_id: channel_id.to_string(),
                });
                info!(channel_id = %channel_id, "Channel live");
                Ok(live)
            }
            Err(e) => {
                error!(channel_id = %channel_id, error = %e, "Channel failed to start");
                self.mark_error(channel_id, ChannelStatus::Starting).await;
                Err(e)
            }
        }
    }

    /// Stop streaming. Stopping a stopped channel is a no-op.
    pub async fn stop_channel(&self, channel_id: &str) -> Result<Channel, LifecycleError> {
        let _guard = self.lock_channel(channel_id).await;
        let channel = self.channels.find_by_id(channel_id).await?;
        self.stop_locked(channel).await
    }

    /// Restart the transcoder. Permitted from `LIVE` or `ERROR`.
    pub async fn restart_channel(&self, channel_id: &str) -> Result<Channel, LifecycleError> {
        let _guard = self.lock_channel(channel_id).await;
        let channel = self.channels.find_by_id(channel_id).await?;
        if !channel.status.can_restart() {
            return Err(LifecycleError::InvalidState {
                channel_id: channel_id.to_string(),
                operation: "restart",
                status: channel.status,
            });
        }
        self.restart_locked(channel).await
    }

    /// Persist a name/configuration change, restarting a live channel when
    /// the change affects the transcoder.
    pub async fn update_channel(
        &self,
        channel_id: &str,
        update: ChannelUpdate,
    ) -> Result<Channel, LifecycleError> {
        let _guard = self.lock_channel(channel_id).await;
        let current = self.channels.find_by_id(channel_id).await?;

        if let Some(ref name) = update.name {
            if name.trim().is_empty() {
                return Err(LifecycleError::Validation(
                    "channel name must not be empty".to_string(),
                ));
            }
        }
        let merged = update.apply_to(&current.config);
        self.planner.plan(&Channel {
            config: merged.clone(),
            ..current.clone()
        })?;

        let needs_restart =
            current.status == ChannelStatus::Live && current.config.requires_restart(&merged);
        let updated = self.channels.update(channel_id, &update).await?;
        info!(channel_id = %channel_id, restart = needs_restart, "Channel updated");

        if needs_restart {
            return self.restart_locked(updated).await;
        }
        if updated.status.is_active() {
            // Picked up by the next automatic restart.
            let plan = self.planner.plan(&updated)?;
            self.supervisor.update_plan(channel_id, plan).await;
        }
        Ok(updated)
    }

    /// Remove the channel and its process record, stopping it first if needed.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), LifecycleError> {
        let _guard = self.lock_channel(channel_id).await;
        let channel = self.channels.find_by_id(channel_id).await?;

        if channel.status.is_active() {
            self.stop_locked(channel).await?;
        } else if let Err(e) = self.supervisor.terminate_stream(channel_id).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to terminate stream before delete");
        }

        self.processes.delete_by_channel_id(channel_id).await?;
        self.channels.delete(channel_id).await?;
        self.supervisor.forget(channel_id).await;
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id);

        info!(channel_id = %channel_id, "Channel deleted");
        Ok(())
    }

    /// Probe every push destination of the channel.
    pub async fn test_connectivity(&self, channel_id: &str) -> Result<Vec<ProbeResult>, LifecycleError> {
        let channel = self.channels.find_by_id(channel_id).await?;
        let urls: Vec<String> = channel
            .config
            .destination_set()
            .into_iter()
            .map(String::from)
            .collect();
        if urls.is_empty() {
            return Err(LifecycleError::Validation(format!(
                "channel {} has no push destinations",
                channel_id
            )));
        }

        let results =
            futures::future::join_all(urls.iter().map(|url| self.probe.probe(url))).await;

        for result in &results {
            if result.reachable {
                self.events.publish(StreamEvent::RtmpConnected {
                    channel_id: channel_id.to_string(),
                    url: Some(result.url.clone()),
                });
            } else {
                self.events.publish(StreamEvent::RtmpConnectionFailure {
                    channel_id: channel_id.to_string(),
                    url: Some(result.url.clone()),
                    critical: result.critical,
                    details: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "destination unreachable".to_string()),
                });
            }
        }
        Ok(results)
    }

    /// Keep channel status in step with supervision: `ERROR` when it gives
    /// up on a stream, `STOPPED` when the transcoder ended on its own.
    pub fn spawn_event_reactor(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.events.subscribe();

        tokio::spawn(async move {
            info!("Channel event reactor started");
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Channel event reactor received shutdown signal");
                        break;
                    }
                    envelope = events.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                match envelope.event {
                    StreamEvent::MaxRestartsExceeded { channel_id, .. }
                    | StreamEvent::StreamAborted { channel_id, .. } => {
                        self.fail_active_channel(&channel_id).await;
                    }
                    StreamEvent::StreamExited { channel_id, .. } => {
                        self.settle_exited_channel(&channel_id).await;
                    }
                    _ => {}
                }
            }
        })
    }

    async fn fail_active_channel(&self, channel_id: &str) {
        let _guard = self.lock_channel(channel_id).await;
        match self.channels.find_by_id(channel_id).await {
            Ok(channel) if channel.status.is_active() => {
                if let Err(e) = self.transition(&channel, ChannelStatus::Error).await {
                    warn!(channel_id = %channel_id, error = %e, "Failed to record channel error");
                }
            }
            Ok(_) => {}
            Err(e) => debug!(channel_id = %channel_id, error = %e, "Event for unknown channel"),
        }
    }

    async fn settle_exited_channel(&self, channel_id: &str) {
        let _guard = self.lock_channel(channel_id).await;
        let channel = match self.channels.find_by_id(channel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(channel_id = %channel_id, error = %e, "Event for unknown channel");
                return;
            }
        };
        // A start or restart may have brought it back since the exit.
        if !channel.status.is_active() || self.supervisor.is_running(channel_id).await {
            return;
        }

        let result = async {
            self.record_uptime(&channel).await?;
            self.supervisor.clear_restart_attempts(channel_id).await;
            self.transition(&channel, ChannelStatus::Stopped).await
        }
        .await;
        match result {
            Ok(_) => {
                self.events.publish(StreamEvent::StreamingStopped {
                    channel_id: channel_id.to_string(),
                });
                info!(channel_id = %channel_id, "Transcoder ended, channel stopped");
            }
            Err(e) => warn!(channel_id = %channel_id, error = %e, "Failed to record channel stop"),
        }
    }

    /// Add the current run of a live channel to its accumulated uptime.
    async fn record_uptime(&self, channel: &Channel) -> Result<(), LifecycleError> {
        if channel.status == ChannelStatus::Live {
            if let Some(started) = channel.last_start_time {
                let uptime = (Utc::now() - started).num_seconds().max(0) as u64;
                self.channels.update_uptime(&channel.id, uptime).await?;
            }
        }
        Ok(())
    }

    async fn check_concurrent_limit(&self, channel: &Channel) -> Result<(), LifecycleError> {
        let active = self
            .channels
            .find_by_client_id(&channel.client_id)
            .await?
            .iter()
            .filter(|c| c.id != channel.id && c.status.is_active())
            .count() as u32;
        let decision = self
            .gate
            .check(&channel.client_id, PlanOperation::StartChannel { active })
            .await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(LifecycleError::LimitExceeded(decision.reason.unwrap_or_else(|| {
                format!("concurrent channel limit of {} reached", decision.limit)
            })))
        }
    }

    /// Plan, make sure a process record exists, spawn.
    async fn launch(&self, channel: &Channel) -> Result<(), LifecycleError> {
        let plan = self.planner.plan(channel)?;
        self.ensure_process(&plan).await?;
        self.supervisor
            .initialize_stream(&channel.id, plan)
            .await?;
        Ok(())
    }

    async fn ensure_process(&self, plan: &StreamPlan) -> Result<(), LifecycleError> {
        match self.processes.find_by_channel_id(&plan.channel_id).await? {
            Some(record) => {
                self.processes
                    .update_status(&record.id, ProcessStatus::Starting, None)
                    .await?;
            }
            None => {
                self.processes
                    .create(NewStreamProcess {
                        channel_id: plan.channel_id.clone(),
                        input_source: plan.input_source.clone(),
                        output_targets: plan.targets(),
                        recovery: self.supervisor.recovery_policy(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn stop_locked(&self, channel: Channel) -> Result<Channel, LifecycleError> {
        if channel.status == ChannelStatus::Stopped {
            debug!(channel_id = %channel.id, "Channel already stopped");
            return Ok(channel);
        }

        if let Err(e) = self.supervisor.terminate_stream(&channel.id).await {
            warn!(channel_id = %channel.id, error = %e, "Failed to terminate stream");
        }

        self.record_uptime(&channel).await?;
        self.supervisor.clear_restart_attempts(&channel.id).await;

        let stopped = self.transition(&channel, ChannelStatus::Stopped).await?;
        self.events.publish(StreamEvent::StreamingStopped {
            channel_id: channel.id.clone(),
        });
        info!(channel_id = %channel.id, "Channel stopped");
        Ok(stopped)
    }

    async fn restart_locked(&self, channel: Channel) -> Result<Channel, LifecycleError> {
        let channel_id = channel.id.clone();
        let result = async {
            let plan = self.planner.plan(&channel)?;
            self.supervisor.update_plan(&channel_id, plan).await;
            self.supervisor.restart_stream(&channel_id).await?;
            Ok::<_, LifecycleError>(())
        }
        .await;

        if let Err(e) = result {
            error!(channel_id = %channel_id, error = %e, "Channel restart failed");
            self.mark_error(&channel_id, channel.status).await;
            return Err(e);
        }

        let mut restarted = self.channels.increment_restart_count(&channel_id).await?;
        if restarted.status != ChannelStatus::Live {
            restarted = self.transition(&restarted, ChannelStatus::Live).await?;
            self.events.publish(StreamEvent::StreamingStarted {
                channel_id: channel_id.clone(),
            });
        }
        info!(channel_id = %channel_id, restarts = restarted.restart_count, "Channel restarted");
        Ok(restarted)
    }

    async fn transition(&self, channel: &Channel, to: ChannelStatus) -> Result<Channel, LifecycleError> {
        let updated = self
            .channels
            .update_status(&channel.id, to, Utc::now())
            .await?;
        if channel.status != to {
            self.events.publish(StreamEvent::ChannelStatusChanged {
                channel_id: channel.id.clone(),
                from: channel.status,
                to,
            });
        }
        Ok(updated)
    }

    /// Best effort: a failure here is logged so the original error survives.
    async fn mark_error(&self, channel_id: &str, from: ChannelStatus) {
        match self
            .channels
            .update_status(channel_id, ChannelStatus::Error, Utc::now())
            .await
        {
            Ok(_) if from != ChannelStatus::Error => {
                self.events.publish(StreamEvent::ChannelStatusChanged {
                    channel_id: channel_id.to_string(),
                    from,
                    to: ChannelStatus::Error,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Failed to record channel error");
            }
        }
    }
}

#[async_trait]
impl ChannelOperationHandler for ChannelLifecycleManager {
    async fn handle(
        &self,
        client_id: &str,
        operation: BulkOperationType,
        channel_id: &str,
    ) -> Result<(), HandlerError> {
        let channel = self.channels.find_by_id(channel_id).await.map_err(LifecycleError::from)?;
        if channel.client_id != client_id {
            return Err(LifecycleError::NotFound(channel_id.to_string()).into());
        }

        match operation {
            BulkOperationType::Start => self.start_channel(channel_id).await.map(drop)?,
            BulkOperationType::Stop => self.stop_channel(channel_id).await.map(drop)?,
            BulkOperationType::Restart => self.restart_channel(channel_id).await.map(drop)?,
            BulkOperationType::Delete => self.delete_channel(channel_id).await?,
        }
        Ok(())
    }
}

fn draft(id: &str, client_id: &str, name: &str, config: ChannelConfig) -> Channel {
    let now = Utc::now();
    Channel {
        id: id.to_string(),
        client_id: client_id.to_string(),
        name: name.to_string(),
        status: ChannelStatus::Stopped,
        config,
        hls_endpoint: None,
        total_uptime_secs: 0,
        restart_count: 0,
        last_start_time: None,
        last_stop_time: None,
        created_at: now,
        updated_at: now,
    }
}
