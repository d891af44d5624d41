//! Fixed-value system sampler.

use std::sync::Mutex;

use crate::resources::{ProcessUsage, SystemSampler, SystemSnapshot};

/// Sampler returning whatever load and memory it was last given.
#[derive(Debug)]
pub struct StaticSampler {
    snapshot: Mutex<SystemSnapshot>,
}

impl StaticSampler {
    /// `cpu_load` is the absolute load average, not a fraction of cores.
    pub fn new(cpu_count: usize, cpu_load: f64, memory_used_percent: f64) -> Self {
        Self {
            snapshot: Mutex::new(SystemSnapshot {
                cpu_load,
                cpu_count,
                memory_used_percent,
            }),
        }
    }

    pub fn set_load(&self, cpu_load: f64) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.cpu_load = cpu_load;
        }
    }

    pub fn set_memory(&self, memory_used_percent: f64) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.memory_used_percent = memory_used_percent;
        }
    }
}

impl SystemSampler for StaticSampler {
    fn sample(&self) -> SystemSnapshot {
        match self.snapshot.lock() {
            Ok(snapshot) => *snapshot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn process_usage(&self, _pid: u32) -> Option<ProcessUsage> {
        Some(ProcessUsage {
            cpu_percent: 12.5,
            memory_bytes: 64 * 1024 * 1024,
        })
    }
}
