//! Host resource sampling and the adaptive concurrency ceiling.

mod config;
mod monitor;
mod sampler;

pub use config::ResourceConfig;
pub use monitor::{Pressure, ResourceConstraints, ResourceMonitor};
pub use sampler::{ProcessUsage, SysinfoSampler, SystemSampler, SystemSnapshot};
