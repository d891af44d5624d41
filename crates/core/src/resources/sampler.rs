use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Point-in-time host utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// 1-minute load average.
    pub cpu_load: f64,
    pub cpu_count: usize,
    pub memory_used_percent: f64,
}

impl SystemSnapshot {
    /// Load average divided by the core count.
    pub fn load_ratio(&self) -> f64 {
        self.cpu_load / self.cpu_count.max(1) as f64
    }
}

/// CPU and memory of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Source of host utilization samples.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> SystemSnapshot;

    /// Usage of a single process, if it is still alive.
    fn process_usage(&self, _pid: u32) -> Option<ProcessUsage> {
        None
    }
}

/// Sampler reading the real host through `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
    cpu_count: usize,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            cpu_count: num_cpus::get(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&self) -> SystemSnapshot {
        let memory_used_percent = match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                let total = system.total_memory();
                if total == 0 {
                    0.0
                } else {
                    system.used_memory() as f64 / total as f64 * 100.0
                }
            }
            Err(_) => 0.0,
        };

        SystemSnapshot {
            cpu_load: System::load_average().one,
            cpu_count: self.cpu_count,
            memory_used_percent,
        }
    }

    fn process_usage(&self, pid: u32) -> Option<ProcessUsage> {
        let mut system = self.system.lock().ok()?;
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| ProcessUsage {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }
}
