//! Process supervisor implementation.
//!
//! Each channel gets a slot in the registry. A slot's `op` mutex serializes
//! supervisor operations on that channel; the live handle itself sits behind
//! a short-held lock so the exit watcher can claim it without waiting for an
//! operation in progress. Whoever removes the handle from the slot owns the
//! exit: `terminate` takes it with the expected-exit flag set, the watcher
//! takes it only if it still carries the watcher's generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, StreamEvent};
use crate::metrics::{ACTIVE_STREAMS, MAX_RESTARTS_EXCEEDED, STREAM_FAILURES, STREAM_RESTARTS};
use crate::planner::{OutputDescriptor, StreamPlan};
use crate::process::{
    HealthMetrics, NewStreamProcess, ProcessStatus, RecoveryPolicy, StreamProcess,
    StreamProcessRepository,
};
use crate::resources::SystemSampler;

use super::backoff::BackoffPolicy;
use super::command::CommandFactory;
use super::config::SupervisorConfig;
use super::error::SupervisorError;
use super::parser::{OutputParser, OutputSignal};
use super::shutdown::shutdown_child;
use super::types::StreamHealth;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last observed output of a running transcoder.
struct Liveness {
    state: Mutex<LivenessState>,
}

struct LivenessState {
    at: Instant,
    wall: DateTime<Utc>,
    bandwidth_kbps: f64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            state: Mutex::new(LivenessState {
                at: Instant::now(),
                wall: Utc::now(),
                bandwidth_kbps: 0.0,
            }),
        }
    }

    fn touch(&self) {
        let mut state = lock(&self.state);
        state.at = Instant::now();
        state.wall = Utc::now();
    }

    fn set_bandwidth(&self, kbps: f64) {
        lock(&self.state).bandwidth_kbps = kbps;
    }

    fn snapshot(&self) -> (Duration, DateTime<Utc>, f64) {
        let state = lock(&self.state);
        (state.at.elapsed(), state.wall, state.bandwidth_kbps)
    }
}

/// The live OS process of a channel. Owned exclusively by its slot.
struct StreamHandle {
    generation: u64,
    process_id: String,
    pid: Option<u32>,
    expected_exit: Arc<AtomicBool>,
    cancel: CancellationToken,
    stop_tx: oneshot::Sender<Duration>,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct ChannelSlot {
    op: tokio::sync::Mutex<()>,
    handle: Mutex<Option<StreamHandle>>,
    last_plan: Mutex<Option<StreamPlan>>,
    attempts: AtomicU32,
    /// Highest generation whose failure has been handled.
    failed_generation: AtomicU64,
    /// Bumped by every explicit terminate. A restart on behalf of a process
    /// spawned under an older epoch gives up.
    stop_epoch: AtomicU64,
}

impl ChannelSlot {
    fn current_generation(&self) -> Option<u64> {
        lock(&self.handle).as_ref().map(|h| h.generation)
    }

    fn plan(&self) -> Option<StreamPlan> {
        lock(&self.last_plan).clone()
    }
}

struct Inner {
    config: SupervisorConfig,
    repo: Arc<dyn StreamProcessRepository>,
    events: EventBus,
    commands: Arc<dyn CommandFactory>,
    sampler: Arc<dyn SystemSampler>,
    backoff: BackoffPolicy,
    registry: RwLock<HashMap<String, Arc<ChannelSlot>>>,
    next_generation: AtomicU64,
    live: AtomicUsize,
}

/// Owns the transcoder subprocess of every channel.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        repo: Arc<dyn StreamProcessRepository>,
        events: EventBus,
        commands: Arc<dyn CommandFactory>,
        sampler: Arc<dyn SystemSampler>,
    ) -> Self {
        let backoff = BackoffPolicy::new(
            Duration::from_millis(config.restart_base_delay_ms),
            Duration::from_millis(config.restart_max_delay_ms),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                repo,
                events,
                commands,
                sampler,
                backoff,
                registry: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                live: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    async fn slot(&self, channel_id: &str) -> Arc<ChannelSlot> {
        if let Some(slot) = self.inner.registry.read().await.get(channel_id) {
            return slot.clone();
        }
        self.inner
            .registry
            .write()
            .await
            .entry(channel_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing_slot(&self, channel_id: &str) -> Option<Arc<ChannelSlot>> {
        self.inner.registry.read().await.get(channel_id).cloned()
    }

    /// Spawn and start supervising the channel's transcoder.
    pub async fn initialize_stream(
        &self,
        channel_id: &str,
        plan: StreamPlan,
    ) -> Result<StreamProcess, SupervisorError> {
        let slot = self.slot(channel_id).await;
        let _op = slot.op.lock().await;
        self.initialize_locked(&slot, channel_id, plan).await
    }

    /// Stop the channel's transcoder. A channel with nothing running is a no-op.
    pub async fn terminate_stream(&self, channel_id: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(channel_id).await;
        slot.stop_epoch.fetch_add(1, Ordering::SeqCst);
        let _op = slot.op.lock().await;
        self.terminate_locked(&slot, channel_id).await
    }

    /// Restart with exponential backoff, giving up at the attempt ceiling.
    pub async fn restart_stream(&self, channel_id: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(channel_id).await;
        let epoch = slot.stop_epoch.load(Ordering::SeqCst);
        self.restart_since(&slot, channel_id, epoch).await
    }

    /// Restart unless the channel has been explicitly stopped since `epoch`.
    async fn restart_since(
        &self,
        slot: &Arc<ChannelSlot>,
        channel_id: &str,
        epoch: u64,
    ) -> Result<(), SupervisorError> {
        if slot.stop_epoch.load(Ordering::SeqCst) != epoch {
            info!(channel_id = %channel_id, "Stream was stopped, restart abandoned");
            return Ok(());
        }
        let max = self.inner.config.max_restarts;

        let attempt = match slot
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |a| (a < max).then_some(a + 1))
        {
            Ok(previous) => previous,
            Err(attempts) => return Err(self.restart_limit_reached(slot, channel_id, attempts).await),
        };

        let Some(plan) = slot.plan() else {
            slot.attempts.fetch_sub(1, Ordering::SeqCst);
            return Err(SupervisorError::NotFound(channel_id.to_string()));
        };

        let delay = self.inner.backoff.delay_for(attempt);
        info!(
            channel_id = %channel_id,
            attempt = attempt + 1,
            max_restarts = max,
            delay_ms = delay.as_millis() as u64,
            "Scheduling stream restart"
        );
        tokio::time::sleep(delay).await;

        let _op = slot.op.lock().await;
        if slot.stop_epoch.load(Ordering::SeqCst) != epoch {
            info!(channel_id = %channel_id, "Stream was stopped during backoff, restart abandoned");
            return Ok(());
        }

        self.terminate_locked(slot, channel_id).await?;
        tokio::time::sleep(self.inner.config.restart_cleanup_delay()).await;
        self.initialize_locked(slot, channel_id, plan).await?;

        STREAM_RESTARTS.inc();
        self.inner.events.publish(StreamEvent::StreamRestarted {
            channel_id: channel_id.to_string(),
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
        });
        Ok(())
    }

    /// Record a failure and try to recover. Never returns an error; recovery
    /// problems are logged.
    pub async fn handle_stream_failure(&self, channel_id: &str, error: &str) {
        self.recover(channel_id, None, None, "reported", error).await;
    }

    /// Stop a stream that must not be restarted automatically.
    pub async fn abort_stream(&self, channel_id: &str, reason: &str) -> Result<(), SupervisorError> {
        self.abort(channel_id, None, reason).await
    }

    pub async fn get_stream_health(&self, channel_id: &str) -> Result<StreamHealth, SupervisorError> {
        let record = self
            .inner
            .repo
            .find_by_channel_id(channel_id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(channel_id.to_string()))?;

        let uptime_secs = match (record.status, record.start_time) {
            (ProcessStatus::Running, Some(start)) => (Utc::now() - start).num_seconds().max(0) as u64,
            _ => 0,
        };

        Ok(StreamHealth {
            channel_id: record.channel_id,
            process_id: record.id,
            status: record.status,
            pid: record.pid,
            uptime_secs,
            last_heartbeat: record.last_heartbeat,
            restart_attempts: self.restart_attempts(channel_id).await,
            error_count: record.error_count,
            health: record.health,
        })
    }

    /// Replace the plan used by the next restart.
    pub async fn update_plan(&self, channel_id: &str, plan: StreamPlan) {
        let slot = self.slot(channel_id).await;
        *lock(&slot.last_plan) = Some(plan);
    }

    pub async fn restart_attempts(&self, channel_id: &str) -> u32 {
        match self.existing_slot(channel_id).await {
            Some(slot) => slot.attempts.load(Ordering::SeqCst),
            None => 0,
        }
    }

    pub async fn clear_restart_attempts(&self, channel_id: &str) {
        if let Some(slot) = self.existing_slot(channel_id).await {
            slot.attempts.store(0, Ordering::SeqCst);
        }
    }

    pub async fn is_running(&self, channel_id: &str) -> bool {
        match self.existing_slot(channel_id).await {
            Some(slot) => slot.current_generation().is_some(),
            None => false,
        }
    }

    /// Live transcoders across all channels.
    pub fn active_stream_count(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Drop the bookkeeping of a channel that has nothing running.
    pub async fn forget(&self, channel_id: &str) {
        let mut registry = self.inner.registry.write().await;
        let idle = registry
            .get(channel_id)
            .map(|slot| slot.current_generation().is_none())
            .unwrap_or(false);
        if idle {
            registry.remove(channel_id);
        }
    }

    /// Terminate every live transcoder.
    pub async fn shutdown_all(&self) {
        let channels: Vec<String> = self.inner.registry.read().await.keys().cloned().collect();
        for channel_id in channels {
            if !self.is_running(&channel_id).await {
                continue;
            }
            if let Err(e) = self.terminate_stream(&channel_id).await {
                warn!(channel_id = %channel_id, error = %e, "Failed to terminate stream during shutdown");
            }
        }
        info!("All streams terminated");
    }

    async fn initialize_locked(
        &self,
        slot: &Arc<ChannelSlot>,
        channel_id: &str,
        plan: StreamPlan,
    ) -> Result<StreamProcess, SupervisorError> {
        if slot.current_generation().is_some() {
            return Err(SupervisorError::AlreadyRunning(channel_id.to_string()));
        }

        let repo = &self.inner.repo;
        let record = match repo.find_by_channel_id(channel_id).await? {
            Some(record) => record,
            None => {
                repo.create(NewStreamProcess {
                    channel_id: channel_id.to_string(),
                    input_source: plan.input_source.clone(),
                    output_targets: plan.targets(),
                    recovery: self.recovery_policy(),
                })
                .await?
            }
        };
        let process_id = record.id.clone();
        *lock(&slot.last_plan) = Some(plan.clone());

        match self.spawn_locked(slot, channel_id, &process_id, &plan).await {
            Ok(record) => Ok(record),
            Err(e) => {
                STREAM_FAILURES.with_label_values(&["spawn"]).inc();
                error!(channel_id = %channel_id, error = %e, "Failed to start transcoder");
                if let Err(store_err) = repo.update_status(&process_id, ProcessStatus::Error, None).await {
                    warn!(channel_id = %channel_id, error = %store_err, "Failed to record spawn failure");
                }
                Err(e)
            }
        }
    }

    async fn spawn_locked(
        &self,
        slot: &Arc<ChannelSlot>,
        channel_id: &str,
        process_id: &str,
        plan: &StreamPlan,
    ) -> Result<StreamProcess, SupervisorError> {
        let repo = &self.inner.repo;
        repo.update_io(process_id, &plan.input_source, &plan.targets())
            .await?;

        if let Some(OutputDescriptor::Hls { playlist_path, .. }) = plan.hls_output() {
            if let Some(dir) = playlist_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        repo.update_status(process_id, ProcessStatus::Starting, None)
            .await?;

        let mut child = self
            .inner
            .commands
            .stream_command(plan)
            .spawn()
            .map_err(|e| SupervisorError::spawn_failed(channel_id, e.to_string()))?;
        let pid = child.id();
        let stderr = child.stderr.take();

        let record = repo
            .update_status(process_id, ProcessStatus::Running, pid)
            .await?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let epoch = slot.stop_epoch.load(Ordering::SeqCst);
        let liveness = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let expected_exit = Arc::new(AtomicBool::new(false));
        let started_at = Instant::now();

        {
            // Held across the spawns so the watcher cannot look for the
            // handle before it is stored.
            let mut handle = lock(&slot.handle);

            if let Some(stderr) = stderr {
                tokio::spawn(self.clone().read_output(
                    channel_id.to_string(),
                    process_id.to_string(),
                    generation,
                    plan.clone(),
                    stderr,
                    liveness.clone(),
                    cancel.clone(),
                ));
            }

            tokio::spawn(self.clone().heartbeat_loop(
                slot.clone(),
                channel_id.to_string(),
                process_id.to_string(),
                generation,
                epoch,
                pid,
                started_at,
                liveness,
                cancel.clone(),
            ));

            let (stop_tx, stop_rx) = oneshot::channel();
            let watcher = tokio::spawn(self.clone().watch_exit(
                slot.clone(),
                channel_id.to_string(),
                process_id.to_string(),
                generation,
                epoch,
                expected_exit.clone(),
                child,
                stop_rx,
            ));

            *handle = Some(StreamHandle {
                generation,
                process_id: process_id.to_string(),
                pid,
                expected_exit,
                cancel,
                stop_tx,
                watcher,
            });
        }

        self.inner.live.fetch_add(1, Ordering::SeqCst);
        ACTIVE_STREAMS.inc();
        info!(
            channel_id = %channel_id,
            pid = ?pid,
            generation,
            outputs = plan.outputs.len(),
            "Transcoder started"
        );
        Ok(record)
    }

    async fn terminate_locked(
        &self,
        slot: &Arc<ChannelSlot>,
        channel_id: &str,
    ) -> Result<(), SupervisorError> {
        let handle = lock(&slot.handle).take();
        let repo = &self.inner.repo;

        let Some(handle) = handle else {
            // Nothing alive; make sure the record does not claim otherwise.
            if let Some(record) = repo.find_by_channel_id(channel_id).await? {
                if matches!(
                    record.status,
                    ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
                ) {
                    repo.update_status(&record.id, ProcessStatus::Idle, None)
                        .await?;
                }
            }
            debug!(channel_id = %channel_id, "No live transcoder to terminate");
            return Ok(());
        };

        handle.expected_exit.store(true, Ordering::SeqCst);
        handle.cancel.cancel();
        if let Err(e) = repo
            .update_status(&handle.process_id, ProcessStatus::Stopping, None)
            .await
        {
            warn!(channel_id = %channel_id, error = %e, "Failed to mark transcoder stopping");
        }

        // A closed channel means the watcher already saw the exit.
        let _ = handle.stop_tx.send(self.inner.config.termination_grace());
        if let Err(e) = handle.watcher.await {
            warn!(channel_id = %channel_id, error = %e, "Exit watcher did not finish cleanly");
        }

        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        ACTIVE_STREAMS.dec();
        repo.update_status(&handle.process_id, ProcessStatus::Idle, None)
            .await?;
        info!(channel_id = %channel_id, pid = ?handle.pid, "Transcoder terminated");
        Ok(())
    }

    async fn restart_limit_reached(
        &self,
        slot: &Arc<ChannelSlot>,
        channel_id: &str,
        attempts: u32,
    ) -> SupervisorError {
        {
            let _op = slot.op.lock().await;
            if let Err(e) = self.terminate_locked(slot, channel_id).await {
                warn!(channel_id = %channel_id, error = %e, "Failed to terminate stream at restart limit");
            }
            match self.inner.repo.find_by_channel_id(channel_id).await {
                Ok(Some(record)) => {
                    if let Err(e) = self
                        .inner
                        .repo
                        .update_status(&record.id, ProcessStatus::Error, None)
                        .await
                    {
                        warn!(channel_id = %channel_id, error = %e, "Failed to mark stream failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(channel_id = %channel_id, error = %e, "Failed to load stream process"),
            }
        }

        MAX_RESTARTS_EXCEEDED.inc();
        error!(channel_id = %channel_id, attempts, "Restart limit reached, giving up");
        self.inner.events.publish(StreamEvent::MaxRestartsExceeded {
            channel_id: channel_id.to_string(),
            attempts,
        });
        SupervisorError::MaxRestartsExceeded {
            channel_id: channel_id.to_string(),
            attempts,
        }
    }

    /// Failure handling shared by the watcher, the heartbeat and callers.
    ///
    /// Reports tagged with a generation that was already handled are dropped,
    /// so an exit and a heartbeat timeout of the same process recover once.
    /// `epoch` is the stop epoch the failed process was spawned under; an
    /// explicit terminate since then cancels the recovery.
    fn recover<'a>(
        &'a self,
        channel_id: &'a str,
        generation: Option<u64>,
        epoch: Option<u64>,
        kind: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let slot = self.slot(channel_id).await;
            let epoch = epoch.unwrap_or_else(|| slot.stop_epoch.load(Ordering::SeqCst));
            if let Some(generation) = generation {
                let previous = slot.failed_generation.fetch_max(generation, Ordering::SeqCst);
                if previous >= generation {
                    debug!(channel_id = %channel_id, generation, "Failure already handled");
                    return;
                }
            }

            STREAM_FAILURES.with_label_values(&[kind]).inc();
            warn!(channel_id = %channel_id, kind, error = %error, "Stream failure");

            match self.inner.repo.find_by_channel_id(channel_id).await {
                Ok(Some(record)) => {
                    if let Err(e) = self.inner.repo.increment_error_count(&record.id).await {
                        warn!(channel_id = %channel_id, error = %e, "Failed to count stream failure");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(channel_id = %channel_id, error = %e, "Failed to load stream process"),
            }

            self.inner.events.publish(StreamEvent::StreamFailure {
                channel_id: channel_id.to_string(),
                error: error.to_string(),
            });

            loop {
                match self.restart_since(&slot, channel_id, epoch).await {
                    Ok(()) => break,
                    Err(SupervisorError::MaxRestartsExceeded { .. }) => break,
                    Err(e @ SupervisorError::ProcessSpawn { .. }) => {
                        warn!(channel_id = %channel_id, error = %e, "Restart attempt failed to spawn");
                    }
                    Err(e) => {
                        self.give_up(&slot, channel_id, &format!("recovery failed: {}", e))
                            .await;
                        break;
                    }
                }
            }
        })
    }

    /// Park a stream that recovery could not bring back in `ERROR`.
    async fn give_up(&self, slot: &Arc<ChannelSlot>, channel_id: &str, reason: &str) {
        {
            let _op = slot.op.lock().await;
            if slot.current_generation().is_some() {
                debug!(channel_id = %channel_id, "Stream is running again, nothing to give up");
                return;
            }
            match self.inner.repo.find_by_channel_id(channel_id).await {
                Ok(Some(record)) => {
                    if let Err(e) = self
                        .inner
                        .repo
                        .update_status(&record.id, ProcessStatus::Error, None)
                        .await
                    {
                        warn!(channel_id = %channel_id, error = %e, "Failed to mark stream failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(channel_id = %channel_id, error = %e, "Failed to load stream process"),
            }
        }

        STREAM_FAILURES.with_label_values(&["recovery"]).inc();
        error!(channel_id = %channel_id, reason = %reason, "Stream recovery failed, giving up");
        self.inner.events.publish(StreamEvent::StreamAborted {
            channel_id: channel_id.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn abort(
        &self,
        channel_id: &str,
        generation: Option<u64>,
        reason: &str,
    ) -> Result<(), SupervisorError> {
        let slot = self.slot(channel_id).await;
        {
            let _op = slot.op.lock().await;
            if let Some(generation) = generation {
                if slot.current_generation() != Some(generation) {
                    return Ok(());
                }
            }
            self.terminate_locked(&slot, channel_id).await?;
            if let Some(record) = self.inner.repo.find_by_channel_id(channel_id).await? {
                self.inner
                    .repo
                    .update_status(&record.id, ProcessStatus::Error, None)
                    .await?;
            }
        }

        STREAM_FAILURES.with_label_values(&["push_critical"]).inc();
        error!(channel_id = %channel_id, reason = %reason, "Stream aborted");
        self.inner.events.publish(StreamEvent::StreamAborted {
            channel_id: channel_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Policy recorded on new process records.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_restarts: self.inner.config.max_restarts,
            restart_delay_ms: self.inner.config.restart_base_delay_ms,
            health_check_interval_ms: self.inner.config.heartbeat_interval_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_output(
        self,
        channel_id: String,
        process_id: String,
        generation: u64,
        plan: StreamPlan,
        stderr: ChildStderr,
        liveness: Arc<Liveness>,
        cancel: CancellationToken,
    ) {
        let push_urls = plan.push_urls().into_iter().map(String::from).collect();
        let parser = OutputParser::new(plan.input_source.clone(), push_urls);
        let progress_is_liveness = plan.hls_output().is_none();
        let mut lines = BufReader::new(stderr).lines();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(channel_id = %channel_id, error = %e, "Transcoder output closed");
                        break;
                    }
                },
            };

            let Some(signal) = parser.classify(&line) else {
                continue;
            };

            if signal.is_error() {
                if let Err(e) = self.inner.repo.increment_error_count(&process_id).await {
                    debug!(channel_id = %channel_id, error = %e, "Failed to count output error");
                }
            }

            match signal {
                OutputSignal::Progress { bitrate_kbps } => {
                    if let Some(kbps) = bitrate_kbps {
                        liveness.set_bandwidth(kbps);
                    }
                    if progress_is_liveness {
                        liveness.touch();
                    }
                    debug!(channel_id = %channel_id, line = %line, "Transcoder progress");
                }
                OutputSignal::SegmentWritten { path } => {
                    liveness.touch();
                    debug!(channel_id = %channel_id, path = %path, "Segment written");
                }
                OutputSignal::OutputOpened { urls } => {
                    for url in urls {
                        info!(channel_id = %channel_id, url = %url, "Push destination connected");
                        self.inner.events.publish(StreamEvent::RtmpConnected {
                            channel_id: channel_id.clone(),
                            url: Some(url),
                        });
                    }
                }
                OutputSignal::PushFailure {
                    url,
                    critical,
                    message,
                } => {
                    warn!(
                        channel_id = %channel_id,
                        url = ?url,
                        critical,
                        message = %message,
                        "Push destination failure"
                    );
                    self.inner.events.publish(StreamEvent::RtmpConnectionFailure {
                        channel_id: channel_id.clone(),
                        url,
                        critical,
                        details: message.clone(),
                    });
                    if critical {
                        let supervisor = self.clone();
                        let channel_id = channel_id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = supervisor
                                .abort(&channel_id, Some(generation), &message)
                                .await
                            {
                                error!(channel_id = %channel_id, error = %e, "Failed to abort stream");
                            }
                        });
                        break;
                    }
                }
                OutputSignal::Error { message } => {
                    warn!(channel_id = %channel_id, message = %message, "Transcoder error output");
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn heartbeat_loop(
        self,
        slot: Arc<ChannelSlot>,
        channel_id: String,
        process_id: String,
        generation: u64,
        epoch: u64,
        pid: Option<u32>,
        started_at: Instant,
        liveness: Arc<Liveness>,
        cancel: CancellationToken,
    ) {
        let interval = self.inner.config.heartbeat_interval();
        let stale_after = interval * 2;
        let reset_after = Duration::from_secs(self.inner.config.attempt_reset_after_secs);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.inner.repo.find_by_id(&process_id).await {
                Ok(record) if record.status == ProcessStatus::Running => {}
                Ok(_) => break,
                Err(e) => {
                    debug!(channel_id = %channel_id, error = %e, "Heartbeat lost its process record");
                    break;
                }
            }

            let (silent_for, last_signal, bandwidth_kbps) = liveness.snapshot();
            if silent_for > stale_after {
                let supervisor = self.clone();
                let channel_id = channel_id.clone();
                let error = format!("heartbeat timeout: no output for {}ms", silent_for.as_millis());
                tokio::spawn(async move {
                    supervisor
                        .recover(&channel_id, Some(generation), Some(epoch), "heartbeat", &error)
                        .await;
                });
                break;
            }

            if let Err(e) = self.inner.repo.update_heartbeat(&process_id, last_signal).await {
                warn!(channel_id = %channel_id, error = %e, "Failed to record heartbeat");
            }

            let usage = pid.and_then(|pid| self.inner.sampler.process_usage(pid));
            let metrics = HealthMetrics {
                cpu_usage: usage.map(|u| u.cpu_percent).unwrap_or_default(),
                memory_usage: usage.map(|u| u.memory_bytes).unwrap_or_default(),
                network_bandwidth_kbps: bandwidth_kbps,
            };
            if let Err(e) = self.inner.repo.update_health_metrics(&process_id, metrics).await {
                warn!(channel_id = %channel_id, error = %e, "Failed to record health metrics");
            }

            if started_at.elapsed() >= reset_after && slot.attempts.swap(0, Ordering::SeqCst) > 0 {
                info!(channel_id = %channel_id, "Stream healthy, restart attempts reset");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn watch_exit(
        self,
        slot: Arc<ChannelSlot>,
        channel_id: String,
        process_id: String,
        generation: u64,
        epoch: u64,
        expected_exit: Arc<AtomicBool>,
        mut child: Child,
        stop_rx: oneshot::Receiver<Duration>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            grace = stop_rx => {
                let grace = grace.unwrap_or_else(|_| self.inner.config.termination_grace());
                if let Err(e) = shutdown_child(&mut child, grace).await {
                    warn!(channel_id = %channel_id, error = %e, "Failed to stop transcoder");
                }
                return;
            }
        };

        if expected_exit.load(Ordering::SeqCst) {
            return;
        }

        let claimed = {
            let mut handle = lock(&slot.handle);
            match handle.as_ref() {
                Some(h) if h.generation == generation => handle.take(),
                _ => None,
            }
        };
        let Some(handle) = claimed else {
            return;
        };
        handle.cancel.cancel();
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        ACTIVE_STREAMS.dec();

        let repo = &self.inner.repo;
        match status {
            Ok(status) if status.code().map_or(true, |code| code == 0) => {
                info!(channel_id = %channel_id, status = %status, "Transcoder exited");
                if let Err(e) = repo.update_status(&process_id, ProcessStatus::Idle, None).await {
                    warn!(channel_id = %channel_id, error = %e, "Failed to record transcoder exit");
                }
                self.inner.events.publish(StreamEvent::StreamExited {
                    channel_id,
                    code: status.code(),
                });
            }
            other => {
                let error = match other {
                    Ok(status) => format!("transcoder exited unexpectedly with {}", status),
                    Err(e) => format!("failed to wait for transcoder: {}", e),
                };
                if let Err(e) = repo.update_status(&process_id, ProcessStatus::Error, None).await {
                    warn!(channel_id = %channel_id, error = %e, "Failed to record transcoder failure");
                }
                let supervisor = self.clone();
                tokio::spawn(async move {
                    supervisor
                        .recover(&channel_id, Some(generation), Some(epoch), "exit", &error)
                        .await;
                });
            }
        }
    }
}
