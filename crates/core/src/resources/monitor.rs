use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ResourceConfig, SystemSampler, SystemSnapshot};
use crate::metrics::{CONCURRENCY_CEILING, CPU_LOAD, MEMORY_USED_PERCENT};

/// Snapshot of thresholds and ceilings for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceConstraints {
    pub max_concurrent_operations: usize,
    pub max_ffmpeg_processes: usize,
    /// Load-average threshold in absolute units (fraction × cores).
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub current_cpu_load: f64,
    pub current_memory_percent: f64,
    pub cpu_count: usize,
}

/// Why the host is considered overloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Cpu,
    Memory,
}

/// Samples host utilization and owns the adaptive concurrency ceiling.
pub struct ResourceMonitor {
    config: ResourceConfig,
    sampler: Arc<dyn SystemSampler>,
    ceiling: AtomicUsize,
    latest: RwLock<SystemSnapshot>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceConfig, sampler: Arc<dyn SystemSampler>) -> Self {
        let initial = config.initial_concurrency.clamp(1, config.max_concurrency.max(1));
        let latest = sampler.sample();
        CONCURRENCY_CEILING.set(initial as i64);

        Self {
            config,
            sampler,
            ceiling: AtomicUsize::new(initial),
            latest: RwLock::new(latest),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Take a fresh sample and remember it.
    pub fn sample(&self) -> SystemSnapshot {
        let snapshot = self.sampler.sample();
        CPU_LOAD.set(snapshot.cpu_load);
        MEMORY_USED_PERCENT.set(snapshot.memory_used_percent);
        if let Ok(mut latest) = self.latest.write() {
            *latest = snapshot;
        }
        snapshot
    }

    /// Most recent sample.
    pub fn snapshot(&self) -> SystemSnapshot {
        match self.latest.read() {
            Ok(latest) => *latest,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Current global ceiling on concurrent bulk operations.
    pub fn concurrency_ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Upper bound on simultaneously live transcoders.
    pub fn max_ffmpeg_processes(&self) -> usize {
        self.snapshot().cpu_count.max(1) * self.config.ffmpeg_processes_per_core
    }

    /// Overload check against the throttle thresholds.
    pub fn pressure(&self, snapshot: &SystemSnapshot) -> Option<Pressure> {
        if snapshot.load_ratio() > self.config.cpu_load_threshold {
            Some(Pressure::Cpu)
        } else if snapshot.memory_used_percent > self.config.memory_threshold_percent {
            Some(Pressure::Memory)
        } else {
            None
        }
    }

    fn is_relaxed(&self, snapshot: &SystemSnapshot) -> bool {
        snapshot.load_ratio() < self.config.relax_cpu_load
            && snapshot.memory_used_percent < self.config.relax_memory_percent
    }

    /// Sample and move the ceiling: ×0.8 (floor 1) under pressure, +1 (up to
    /// the configured maximum) when relaxed, unchanged in between.
    pub fn adjust(&self) -> usize {
        let snapshot = self.sample();
        let current = self.concurrency_ceiling();

        let next = if self.pressure(&snapshot).is_some() {
            ((current as f64 * 0.8).floor() as usize).max(1)
        } else if self.is_relaxed(&snapshot) {
            (current + 1).min(self.config.max_concurrency)
        } else {
            current
        };

        if next != current {
            self.ceiling.store(next, Ordering::SeqCst);
            CONCURRENCY_CEILING.set(next as i64);
            info!(
                from = current,
                to = next,
                cpu_load = snapshot.cpu_load,
                memory_percent = snapshot.memory_used_percent,
                "Concurrency ceiling adjusted"
            );
        } else {
            debug!(
                ceiling = current,
                cpu_load = snapshot.cpu_load,
                memory_percent = snapshot.memory_used_percent,
                "Concurrency ceiling unchanged"
            );
        }
        next
    }

    pub fn constraints(&self) -> ResourceConstraints {
        let snapshot = self.snapshot();
        ResourceConstraints {
            max_concurrent_operations: self.concurrency_ceiling(),
            max_ffmpeg_processes: self.max_ffmpeg_processes(),
            cpu_threshold: self.config.cpu_load_threshold * snapshot.cpu_count.max(1) as f64,
            memory_threshold: self.config.memory_threshold_percent,
            current_cpu_load: snapshot.cpu_load,
            current_memory_percent: snapshot.memory_used_percent,
            cpu_count: snapshot.cpu_count,
        }
    }

    /// Run the adjust loop until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sample_interval_secs.max(1));

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Resource monitor started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Resource monitor received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        self.adjust();
                    }
                }
            }
        })
    }
}
