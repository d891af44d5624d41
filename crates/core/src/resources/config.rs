use serde::{Deserialize, Serialize};

/// `[resources]` section: host sampling and adaptive concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_initial_concurrency")]
    pub initial_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 1-minute load average as a fraction of the core count.
    #[serde(default = "default_cpu_load_threshold")]
    pub cpu_load_threshold: f64,
    #[serde(default = "default_memory_threshold_percent")]
    pub memory_threshold_percent: f64,
    /// The ceiling grows only while load is below this fraction of cores...
    #[serde(default = "default_relax_cpu_load")]
    pub relax_cpu_load: f64,
    /// ...and memory is below this percentage.
    #[serde(default = "default_relax_memory_percent")]
    pub relax_memory_percent: f64,
    #[serde(default = "default_ffmpeg_processes_per_core")]
    pub ffmpeg_processes_per_core: usize,
}

fn default_sample_interval_secs() -> u64 {
    30
}

fn default_initial_concurrency() -> usize {
    5
}

fn default_max_concurrency() -> usize {
    10
}

fn default_cpu_load_threshold() -> f64 {
    0.8
}

fn default_memory_threshold_percent() -> f64 {
    85.0
}

fn default_relax_cpu_load() -> f64 {
    0.5
}

fn default_relax_memory_percent() -> f64 {
    60.0
}

fn default_ffmpeg_processes_per_core() -> usize {
    2
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            initial_concurrency: default_initial_concurrency(),
            max_concurrency: default_max_concurrency(),
            cpu_load_threshold: default_cpu_load_threshold(),
            memory_threshold_percent: default_memory_threshold_percent(),
            relax_cpu_load: default_relax_cpu_load(),
            relax_memory_percent: default_relax_memory_percent(),
            ffmpeg_processes_per_core: default_ffmpeg_processes_per_core(),
        }
    }
}
