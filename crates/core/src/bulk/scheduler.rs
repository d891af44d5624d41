use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::MAX_BATCH_CAP;
use super::locks::{ChannelLockGuard, ChannelLocks};
use super::queue::{OperationQueue, QueueEntry};
use super::{
    Availability, BulkError, BulkOperationRequest, BulkOperationResult, BulkOperationType,
    BulkStatus, ChannelOperationResult, SchedulerConfig,
};
use crate::metrics::{ADMISSION_REJECTIONS, BULK_CHANNEL_RESULTS, BULK_OPERATIONS};
use crate::resources::{Pressure, ResourceConstraints, ResourceMonitor};
use crate::subscription::SubscriptionGate;
use crate::supervisor::ProcessSupervisor;

const MIN_PRIORITY: u8 = 1;
const MAX_PRIORITY: u8 = 10;
const MAX_CHANNEL_CONCURRENCY: usize = 10;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Applies one bulk action to one channel.
#[async_trait]
pub trait ChannelOperationHandler: Send + Sync {
    async fn handle(
        &self,
        client_id: &str,
        operation: BulkOperationType,
        channel_id: &str,
    ) -> Result<(), HandlerError>;
}

/// Number of transcoders currently live on this host.
pub trait StreamCounter: Send + Sync {
    fn active_streams(&self) -> usize;
}

impl StreamCounter for ProcessSupervisor {
    fn active_streams(&self) -> usize {
        self.active_stream_count()
    }
}

/// Channel fan-out for one operation: `min(10, floor(3 × max(1, priority/5)))`.
pub fn concurrency_limit(priority: u8) -> usize {
    let scaled = 3.0 * (priority as f64 / 5.0).max(1.0);
    (scaled.floor() as usize).min(MAX_CHANNEL_CONCURRENCY)
}

/// Operations one client may run at once: `min(global, max(1, floor(global × priority/10)))`.
pub fn client_allowance(global_max: usize, priority: u8) -> usize {
    let scaled = (global_max as f64 * priority as f64 / 10.0).floor() as usize;
    scaled.max(1).min(global_max.max(1))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct InFlight {
    total: usize,
    per_client: HashMap<String, usize>,
}

/// Counts one executing operation until dropped.
struct InFlightGuard {
    tracker: Arc<Mutex<InFlight>>,
    client_id: String,
}

impl InFlightGuard {
    fn enter(tracker: Arc<Mutex<InFlight>>, client_id: &str) -> Self {
        {
            let mut in_flight = lock(&tracker);
            in_flight.total += 1;
            *in_flight.per_client.entry(client_id.to_string()).or_insert(0) += 1;
        }
        Self {
            tracker,
            client_id: client_id.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.tracker);
        in_flight.total = in_flight.total.saturating_sub(1);
        if let Some(count) = in_flight.per_client.get_mut(&self.client_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.per_client.remove(&self.client_id);
            }
        }
    }
}

/// An operation taken off the queue with its locks held.
struct Execution {
    entry: QueueEntry,
    _locks: ChannelLockGuard,
    _in_flight: InFlightGuard,
}

/// Queues bulk requests and fans them out under locks, concurrency limits
/// and admission control.
pub struct BulkOperationScheduler {
    config: SchedulerConfig,
    monitor: Arc<ResourceMonitor>,
    gate: Arc<dyn SubscriptionGate>,
    streams: Arc<dyn StreamCounter>,
    queue: Mutex<OperationQueue>,
    results: RwLock<HashMap<String, BulkOperationResult>>,
    locks: ChannelLocks,
    in_flight: Arc<Mutex<InFlight>>,
    wake: Notify,
}

impl BulkOperationScheduler {
    pub fn new(
        config: SchedulerConfig,
        monitor: Arc<ResourceMonitor>,
        gate: Arc<dyn SubscriptionGate>,
        streams: Arc<dyn StreamCounter>,
    ) -> Self {
        Self {
            config,
            monitor,
            gate,
            streams,
            queue: Mutex::new(OperationQueue::new()),
            results: RwLock::new(HashMap::new()),
            locks: ChannelLocks::new(),
            in_flight: Arc::new(Mutex::new(InFlight::default())),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate and enqueue a request, returning its operation id.
    pub async fn queue_bulk_operation(
        &self,
        client_id: &str,
        request: BulkOperationRequest,
    ) -> Result<String, BulkError> {
        let max = self.config.max_batch_size.clamp(1, MAX_BATCH_CAP);
        if request.channel_ids.is_empty() {
            return Err(BulkError::Validation(
                "channel_ids must not be empty".to_string(),
            ));
        }
        if request.channel_ids.len() > max {
            return Err(BulkError::BatchTooLarge {
                size: request.channel_ids.len(),
                max,
            });
        }
        if request.channel_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(BulkError::Validation(
                "channel_ids must not contain blank ids".to_string(),
            ));
        }
        if let Some(priority) = request.priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                return Err(BulkError::InvalidPriority(priority));
            }
        }

        let mut seen = HashSet::new();
        let channel_ids: Vec<String> = request
            .channel_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let priority = match request.priority {
            Some(priority) => priority,
            None => self.client_priority(client_id).await,
        };

        let operation_id = uuid::Uuid::new_v4().to_string();
        let entry = QueueEntry {
            operation_id: operation_id.clone(),
            client_id: client_id.to_string(),
            operation: request.operation,
            channel_ids: channel_ids.clone(),
            priority,
            enqueued_at: Utc::now(),
        };

        self.store_result(BulkOperationResult::pending(
            operation_id.clone(),
            client_id.to_string(),
            request.operation,
            channel_ids,
            priority,
        ));
        let depth = {
            let mut queue = lock(&self.queue);
            queue.push(entry);
            queue.len()
        };
        self.wake.notify_one();

        info!(
            operation_id = %operation_id,
            client_id = %client_id,
            operation = %request.operation,
            priority,
            queue_depth = depth,
            "Bulk operation queued"
        );
        Ok(operation_id)
    }

    /// Run a queued operation to completion.
    ///
    /// Each operation id executes at most once. A lock conflict fails the
    /// whole operation before any channel is touched; per-channel failures
    /// never do.
    pub async fn execute_bulk_operation(
        &self,
        operation_id: &str,
        handler: Arc<dyn ChannelOperationHandler>,
    ) -> Result<BulkOperationResult, BulkError> {
        let execution = self.begin(operation_id)?;
        Ok(self.run(execution, handler.as_ref()).await)
    }

    pub fn get_operation_status(&self, operation_id: &str) -> Result<BulkOperationResult, BulkError> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation_id)
            .cloned()
            .ok_or_else(|| BulkError::NotFound(operation_id.to_string()))
    }

    /// Admission check for a new operation of this client.
    pub async fn check_resource_availability(
        &self,
        client_id: &str,
        operation: BulkOperationType,
    ) -> Availability {
        let priority = self.client_priority(client_id).await;
        self.admit(client_id, operation, priority)
    }

    pub fn get_resource_constraints(&self) -> ResourceConstraints {
        self.monitor.constraints()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).total
    }

    /// Run the dispatcher until `shutdown` is cancelled.
    ///
    /// Wakes on submission, on completion and every dispatch interval, and
    /// starts every queued operation that passes admission, highest
    /// priority first.
    pub fn spawn(
        self: Arc<Self>,
        handler: Arc<dyn ChannelOperationHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let interval = self.config.dispatch_interval();

        tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                "Bulk dispatcher started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Bulk dispatcher received shutdown signal");
                        break;
                    }
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                self.prune_results();
                self.dispatch_ready(&handler);
            }
        })
    }

    fn dispatch_ready(self: &Arc<Self>, handler: &Arc<dyn ChannelOperationHandler>) -> usize {
        let pending: Vec<QueueEntry> = lock(&self.queue).iter().cloned().collect();
        let mut started = 0;

        for entry in pending {
            let availability = self.admit(&entry.client_id, entry.operation, entry.priority);
            if !availability.available {
                debug!(
                    operation_id = %entry.operation_id,
                    reason = availability.reason.as_deref().unwrap_or(""),
                    "Bulk operation held back"
                );
                continue;
            }

            match self.begin(&entry.operation_id) {
                Ok(execution) => {
                    let scheduler = Arc::clone(self);
                    let handler = Arc::clone(handler);
                    tokio::spawn(async move {
                        scheduler.run(execution, handler.as_ref()).await;
                    });
                    started += 1;
                }
                Err(e) => {
                    warn!(operation_id = %entry.operation_id, error = %e, "Bulk operation not started");
                }
            }
        }
        started
    }

    /// Take the entry off the queue and lock its channels.
    fn begin(&self, operation_id: &str) -> Result<Execution, BulkError> {
        let entry = lock(&self.queue)
            .remove(operation_id)
            .ok_or_else(|| BulkError::NotFound(operation_id.to_string()))?;

        let locks = match self.locks.try_acquire(&entry.operation_id, &entry.channel_ids) {
            Ok(guard) => guard,
            Err(conflicts) => {
                self.record_conflict(&entry, &conflicts);
                self.wake.notify_one();
                return Err(BulkError::ChannelsLocked {
                    operation_id: entry.operation_id,
                    channels: conflicts,
                });
            }
        };
        let in_flight = InFlightGuard::enter(self.in_flight.clone(), &entry.client_id);

        self.update_result(&entry.operation_id, |result| {
            result.status = BulkStatus::InProgress;
            result.started_at = Some(Utc::now());
        });

        Ok(Execution {
            entry,
            _locks: locks,
            _in_flight: in_flight,
        })
    }

    async fn run(
        &self,
        execution: Execution,
        handler: &dyn ChannelOperationHandler,
    ) -> BulkOperationResult {
        let entry = &execution.entry;
        let limit = concurrency_limit(entry.priority);
        info!(
            operation_id = %entry.operation_id,
            client_id = %entry.client_id,
            operation = %entry.operation,
            channels = entry.channel_ids.len(),
            concurrency = limit,
            "Bulk operation started"
        );

        let results: Vec<ChannelOperationResult> = stream::iter(entry.channel_ids.clone())
            .map(|channel_id: String| async move {
                let started_at: DateTime<Utc> = Utc::now();
                match handler
                    .handle(&entry.client_id, entry.operation, &channel_id)
                    .await
                {
                    Ok(()) => {
                        BULK_CHANNEL_RESULTS
                            .with_label_values(&[entry.operation.as_str(), "success"])
                            .inc();
                        ChannelOperationResult::success(channel_id, started_at)
                    }
                    Err(e) => {
                        BULK_CHANNEL_RESULTS
                            .with_label_values(&[entry.operation.as_str(), "failure"])
                            .inc();
                        warn!(
                            operation_id = %entry.operation_id,
                            channel_id = %channel_id,
                            error = %e,
                            "Bulk channel operation failed"
                        );
                        ChannelOperationResult::failed(channel_id, started_at, e.to_string())
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await;

        let mut finished = self
            .get_operation_status(&entry.operation_id)
            .unwrap_or_else(|_| {
                BulkOperationResult::pending(
                    entry.operation_id.clone(),
                    entry.client_id.clone(),
                    entry.operation,
                    entry.channel_ids.clone(),
                    entry.priority,
                )
            });
        finished.set_results(results);
        finished.status = BulkStatus::Completed;
        finished.completed_at = Some(Utc::now());
        self.store_result(finished.clone());

        BULK_OPERATIONS
            .with_label_values(&[entry.operation.as_str(), BulkStatus::Completed.as_str()])
            .inc();
        info!(
            operation_id = %entry.operation_id,
            succeeded = finished.success_count,
            failed = finished.failure_count,
            "Bulk operation completed"
        );

        drop(execution);
        self.wake.notify_one();
        finished
    }

    fn admit(&self, client_id: &str, operation: BulkOperationType, priority: u8) -> Availability {
        let snapshot = self.monitor.sample();
        match self.monitor.pressure(&snapshot) {
            Some(Pressure::Cpu) => {
                let threshold =
                    self.monitor.config().cpu_load_threshold * snapshot.cpu_count.max(1) as f64;
                return reject(
                    "cpu",
                    format!(
                        "CPU load {:.2} exceeds threshold {:.2}",
                        snapshot.cpu_load, threshold
                    ),
                );
            }
            Some(Pressure::Memory) => {
                return reject(
                    "memory",
                    format!(
                        "Memory usage {:.1}% exceeds threshold {:.1}%",
                        snapshot.memory_used_percent,
                        self.monitor.config().memory_threshold_percent
                    ),
                );
            }
            None => {}
        }

        let global_max = self.monitor.concurrency_ceiling();
        let (total, mine) = {
            let in_flight = lock(&self.in_flight);
            (
                in_flight.total,
                in_flight.per_client.get(client_id).copied().unwrap_or(0),
            )
        };
        if total >= global_max {
            return reject(
                "global_limit",
                format!("{} operations in flight, limit is {}", total, global_max),
            );
        }

        let allowance = client_allowance(global_max, priority);
        if mine >= allowance {
            return reject(
                "client_limit",
                format!(
                    "Client has {} operations in flight, allowance is {}",
                    mine, allowance
                ),
            );
        }

        if operation.spawns_processes() {
            let live = self.streams.active_streams();
            let max_processes = self.monitor.max_ffmpeg_processes();
            if live >= max_processes {
                return reject(
                    "process_limit",
                    format!("{} transcoders running, limit is {}", live, max_processes),
                );
            }
        }

        Availability::available()
    }

    async fn client_priority(&self, client_id: &str) -> u8 {
        match self.gate.priority(client_id).await {
            Ok(priority) => priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Falling back to default priority");
                MIN_PRIORITY
            }
        }
    }

    fn record_conflict(&self, entry: &QueueEntry, conflicts: &[String]) {
        warn!(
            operation_id = %entry.operation_id,
            conflicts = ?conflicts,
            "Bulk operation rejected: channels locked by another operation"
        );
        let reason = format!("Channels locked by another operation: {}", conflicts.join(", "));
        let results = entry
            .channel_ids
            .iter()
            .map(|id| ChannelOperationResult::skipped(id.clone(), &reason))
            .collect();

        let now = Utc::now();
        let mut result = BulkOperationResult::pending(
            entry.operation_id.clone(),
            entry.client_id.clone(),
            entry.operation,
            entry.channel_ids.clone(),
            entry.priority,
        );
        if let Ok(existing) = self.get_operation_status(&entry.operation_id) {
            result.created_at = existing.created_at;
        }
        result.set_results(results);
        result.status = BulkStatus::Failed;
        result.conflicting_channels = conflicts.to_vec();
        result.error = Some(reason);
        result.started_at = Some(now);
        result.completed_at = Some(now);
        self.store_result(result);

        BULK_OPERATIONS
            .with_label_values(&[entry.operation.as_str(), BulkStatus::Failed.as_str()])
            .inc();
    }

    fn store_result(&self, result: BulkOperationResult) {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.operation_id.clone(), result);
    }

    fn update_result<F>(&self, operation_id: &str, apply: F)
    where
        F: FnOnce(&mut BulkOperationResult),
    {
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = results.get_mut(operation_id) {
            apply(result);
        }
    }

    /// Drop finished results older than the retention window.
    pub fn prune_results(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.result_retention())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = Utc::now() - retention;

        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        let before = results.len();
        results.retain(|_, result| {
            !(result.status.is_finished()
                && result.completed_at.map(|at| at <= cutoff).unwrap_or(false))
        });
        let pruned = before - results.len();
        if pruned > 0 {
            debug!(pruned, "Pruned bulk operation results");
        }
        pruned
    }
}

fn reject(reason_label: &str, reason: String) -> Availability {
    ADMISSION_REJECTIONS.with_label_values(&[reason_label]).inc();
    debug!(reason = %reason, "Admission rejected");
    Availability::rejected(reason)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::resources::ResourceConfig;
    use crate::testing::{MockSubscriptionGate, StaticSampler};

    /// Sleeps per channel, fails listed ids and records peak concurrency.
    struct RecordingHandler {
        delay: Duration,
        fail: HashSet<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new(delay_ms: u64, fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                fail: fail.iter().map(|s| s.to_string()).collect(),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            lock(&self.calls).clone()
        }
    }

    #[async_trait]
    impl ChannelOperationHandler for RecordingHandler {
        async fn handle(
            &self,
            _client_id: &str,
            _operation: BulkOperationType,
            channel_id: &str,
        ) -> Result<(), HandlerError> {
            lock(&self.calls).push(channel_id.to_string());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(channel_id) {
                Err(format!("channel {} rejected", channel_id).into())
            } else {
                Ok(())
            }
        }
    }

    struct FixedStreams(usize);

    impl StreamCounter for FixedStreams {
        fn active_streams(&self) -> usize {
            self.0
        }
    }

    struct Setup {
        scheduler: Arc<BulkOperationScheduler>,
        sampler: Arc<StaticSampler>,
        gate: Arc<MockSubscriptionGate>,
    }

    fn setup_with(config: SchedulerConfig, initial_concurrency: usize, live: usize) -> Setup {
        let sampler = Arc::new(StaticSampler::new(4, 1.0, 40.0));
        let monitor = Arc::new(ResourceMonitor::new(
            ResourceConfig {
                initial_concurrency,
                ..ResourceConfig::default()
            },
            sampler.clone(),
        ));
        let gate = Arc::new(MockSubscriptionGate::new());
        let scheduler = Arc::new(BulkOperationScheduler::new(
            config,
            monitor,
            gate.clone(),
            Arc::new(FixedStreams(live)),
        ));
        Setup {
            scheduler,
            sampler,
            gate,
        }
    }

    fn setup() -> Setup {
        setup_with(SchedulerConfig::default(), 5, 0)
    }

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("ch-{}", i)).collect()
    }

    fn start(channel_ids: &[&str]) -> BulkOperationRequest {
        BulkOperationRequest::new(
            BulkOperationType::Start,
            channel_ids.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_concurrency_limit_formula() {
        assert_eq!(concurrency_limit(1), 3);
        assert_eq!(concurrency_limit(5), 3);
        assert_eq!(concurrency_limit(7), 4);
        assert_eq!(concurrency_limit(10), 6);
        assert_eq!(concurrency_limit(50), 10);
    }

    #[test]
    fn test_client_allowance_formula() {
        assert_eq!(client_allowance(10, 1), 1);
        assert_eq!(client_allowance(10, 5), 5);
        assert_eq!(client_allowance(10, 10), 10);
        assert_eq!(client_allowance(3, 5), 1);
        assert_eq!(client_allowance(1, 10), 1);
    }

    #[tokio::test]
    async fn test_queue_rejects_invalid_requests() {
        let s = setup();

        let err = s
            .scheduler
            .queue_bulk_operation("client", BulkOperationRequest::new(BulkOperationType::Stop, vec![]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = s
            .scheduler
            .queue_bulk_operation(
                "client",
                BulkOperationRequest::new(BulkOperationType::Start, ids(51)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::BatchTooLarge { size: 51, max: 50 }));

        let err = s
            .scheduler
            .queue_bulk_operation("client", start(&["a", " "]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = s
            .scheduler
            .queue_bulk_operation("client", start(&["a"]).with_priority(11))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::InvalidPriority(11)));

        assert_eq!(s.scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_accepts_fifty() {
        let s = setup();
        let id = s
            .scheduler
            .queue_bulk_operation(
                "client",
                BulkOperationRequest::new(BulkOperationType::Start, ids(50)),
            )
            .await
            .unwrap();
        let status = s.scheduler.get_operation_status(&id).unwrap();
        assert_eq!(status.status, BulkStatus::Pending);
        assert_eq!(status.channel_ids.len(), 50);
    }

    #[tokio::test]
    async fn test_priority_resolution() {
        let s = setup();
        s.gate.set_priority("gold", 7).await;

        let from_plan = s
            .scheduler
            .queue_bulk_operation("gold", start(&["a"]))
            .await
            .unwrap();
        let overridden = s
            .scheduler
            .queue_bulk_operation("gold", start(&["b"]).with_priority(2))
            .await
            .unwrap();
        let default = s
            .scheduler
            .queue_bulk_operation("nobody", start(&["c"]))
            .await
            .unwrap();

        assert_eq!(s.scheduler.get_operation_status(&from_plan).unwrap().priority, 7);
        assert_eq!(s.scheduler.get_operation_status(&overridden).unwrap().priority, 2);
        assert_eq!(s.scheduler.get_operation_status(&default).unwrap().priority, 1);
    }

    #[tokio::test]
    async fn test_duplicate_channel_ids_collapse() {
        let s = setup();
        let id = s
            .scheduler
            .queue_bulk_operation("client", start(&["a", "b", "a"]))
            .await
            .unwrap();
        let status = s.scheduler.get_operation_status(&id).unwrap();
        assert_eq!(status.channel_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_partial_failure_is_completed() {
        let s = setup();
        let handler = RecordingHandler::new(1, &["b"]);
        let id = s
            .scheduler
            .queue_bulk_operation("client", start(&["a", "b", "c"]))
            .await
            .unwrap();

        let result = s
            .scheduler
            .execute_bulk_operation(&id, handler.clone())
            .await
            .unwrap();

        assert_eq!(result.status, BulkStatus::Completed);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[1].channel_id, "b");
        assert!(result.results[1].error.as_deref().unwrap().contains("rejected"));
        assert!(result.completed_at.is_some());

        let polled = s.scheduler.get_operation_status(&id).unwrap();
        assert_eq!(polled.status, BulkStatus::Completed);
        assert_eq!(s.scheduler.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_at_most_once() {
        let s = setup();
        let handler = RecordingHandler::new(1, &[]);
        let id = s
            .scheduler
            .queue_bulk_operation("client", start(&["a"]))
            .await
            .unwrap();

        s.scheduler
            .execute_bulk_operation(&id, handler.clone())
            .await
            .unwrap();
        let err = s
            .scheduler
            .execute_bulk_operation(&id, handler.clone())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(handler.calls().len(), 1);

        let err = s
            .scheduler
            .execute_bulk_operation("missing", handler)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_overlapping_operations_all_or_nothing() {
        let s = setup();
        let handler = RecordingHandler::new(100, &[]);
        let first = s
            .scheduler
            .queue_bulk_operation("client", start(&["a", "b"]))
            .await
            .unwrap();
        let second = s
            .scheduler
            .queue_bulk_operation("client", start(&["b", "c"]))
            .await
            .unwrap();

        let (first_result, second_result) = tokio::join!(
            s.scheduler.execute_bulk_operation(&first, handler.clone()),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                s.scheduler.execute_bulk_operation(&second, handler.clone()).await
            }
        );

        let first_result = first_result.unwrap();
        assert_eq!(first_result.status, BulkStatus::Completed);
        assert_eq!(first_result.success_count, 2);

        match second_result {
            Err(BulkError::ChannelsLocked { channels, .. }) => {
                assert_eq!(channels, vec!["b".to_string()])
            }
            other => panic!("expected lock conflict, got {:?}", other.map(|r| r.status)),
        }
        let failed = s.scheduler.get_operation_status(&second).unwrap();
        assert_eq!(failed.status, BulkStatus::Failed);
        assert_eq!(failed.conflicting_channels, vec!["b".to_string()]);
        assert_eq!(failed.results.len(), 2);
        assert_eq!(failed.success_count, 0);

        // "c" was never handled.
        assert!(!handler.calls().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_fan_out_respects_priority_concurrency() {
        let s = setup();
        let handler = RecordingHandler::new(20, &[]);
        let id = s
            .scheduler
            .queue_bulk_operation(
                "client",
                BulkOperationRequest::new(BulkOperationType::Stop, ids(9)).with_priority(1),
            )
            .await
            .unwrap();

        let result = s
            .scheduler
            .execute_bulk_operation(&id, handler.clone())
            .await
            .unwrap();
        assert_eq!(result.success_count, 9);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert!(handler.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_availability_follows_cpu_and_memory() {
        let s = setup();

        s.sampler.set_load(3.6);
        let availability = s
            .scheduler
            .check_resource_availability("client", BulkOperationType::Start)
            .await;
        assert!(!availability.available);
        assert!(availability.reason.unwrap().contains("CPU"));

        s.sampler.set_load(1.6);
        assert!(
            s.scheduler
                .check_resource_availability("client", BulkOperationType::Start)
                .await
                .available
        );

        s.sampler.set_memory(90.0);
        let availability = s
            .scheduler
            .check_resource_availability("client", BulkOperationType::Stop)
            .await;
        assert!(!availability.available);
        assert!(availability.reason.unwrap().contains("Memory"));
    }

    #[tokio::test]
    async fn test_availability_enforces_global_and_client_limits() {
        let s = setup_with(SchedulerConfig::default(), 2, 0);
        let handler = RecordingHandler::new(200, &[]);
        let id = s
            .scheduler
            .queue_bulk_operation("busy", start(&["a"]))
            .await
            .unwrap();

        let scheduler = s.scheduler.clone();
        let running = tokio::spawn(async move {
            scheduler.execute_bulk_operation(&id, handler).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(s.scheduler.in_flight_count(), 1);

        // Priority 1 with a ceiling of 2 allows one operation per client.
        let busy = s
            .scheduler
            .check_resource_availability("busy", BulkOperationType::Stop)
            .await;
        assert!(!busy.available);
        assert!(busy.reason.unwrap().contains("allowance"));

        assert!(
            s.scheduler
                .check_resource_availability("idle", BulkOperationType::Stop)
                .await
                .available
        );

        running.await.unwrap().unwrap();
        assert!(
            s.scheduler
                .check_resource_availability("busy", BulkOperationType::Stop)
                .await
                .available
        );
    }

    #[tokio::test]
    async fn test_availability_enforces_process_budget_for_starts() {
        // 4 cores × 2 processes per core.
        let s = setup_with(SchedulerConfig::default(), 5, 8);

        let start = s
            .scheduler
            .check_resource_availability("client", BulkOperationType::Start)
            .await;
        assert!(!start.available);
        assert!(
            !s.scheduler
                .check_resource_availability("client", BulkOperationType::Restart)
                .await
                .available
        );
        assert!(
            s.scheduler
                .check_resource_availability("client", BulkOperationType::Stop)
                .await
                .available
        );
    }

    #[tokio::test]
    async fn test_dispatcher_runs_queued_operations() {
        let s = setup();
        let handler = RecordingHandler::new(1, &["b"]);
        let shutdown = CancellationToken::new();
        let dispatcher = s.scheduler.clone().spawn(handler.clone(), shutdown.clone());

        let id = s
            .scheduler
            .queue_bulk_operation("client", start(&["a", "b"]))
            .await
            .unwrap();

        let mut status = BulkStatus::Pending;
        for _ in 0..100 {
            status = s.scheduler.get_operation_status(&id).unwrap().status;
            if status.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, BulkStatus::Completed);
        assert_eq!(s.scheduler.pending_count(), 0);

        shutdown.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_pass_starts_every_admitted_entry() {
        let s = setup_with(SchedulerConfig::default(), 2, 0);
        let handler: Arc<dyn ChannelOperationHandler> = RecordingHandler::new(200, &[]);
        for (client, channel) in [("busy", "a"), ("busy", "b"), ("other", "c")] {
            s.scheduler
                .queue_bulk_operation(client, start(&[channel]))
                .await
                .unwrap();
        }

        // One per client at priority 1, so the second "busy" entry waits.
        let started = s.scheduler.dispatch_ready(&handler);
        assert_eq!(started, 2);
        assert_eq!(s.scheduler.in_flight_count(), 2);
        assert_eq!(s.scheduler.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_holds_back_under_pressure() {
        let s = setup();
        s.sampler.set_load(3.9);
        let handler = RecordingHandler::new(1, &[]);
        let shutdown = CancellationToken::new();
        let dispatcher = s.scheduler.clone().spawn(handler.clone(), shutdown.clone());

        let id = s
            .scheduler
            .queue_bulk_operation("client", start(&["a"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.scheduler.get_operation_status(&id).unwrap().status, BulkStatus::Pending);
        assert!(handler.calls().is_empty());

        s.sampler.set_load(1.0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            s.scheduler.get_operation_status(&id).unwrap().status,
            BulkStatus::Completed
        );

        shutdown.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_results_pruned_after_retention() {
        let s = setup_with(
            SchedulerConfig {
                result_retention_secs: 0,
                ..SchedulerConfig::default()
            },
            5,
            0,
        );
        let handler = RecordingHandler::new(1, &[]);
        let done = s
            .scheduler
            .queue_bulk_operation("client", start(&["a"]))
            .await
            .unwrap();
        let pending = s
            .scheduler
            .queue_bulk_operation("client", start(&["b"]))
            .await
            .unwrap();
        s.scheduler.execute_bulk_operation(&done, handler).await.unwrap();

        assert_eq!(s.scheduler.prune_results(), 1);
        assert!(s.scheduler.get_operation_status(&done).unwrap_err().is_not_found());
        assert!(s.scheduler.get_operation_status(&pending).is_ok());
    }
}
