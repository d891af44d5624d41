//! Test doubles for every collaborator the core depends on.
//!
//! Repositories are in-memory with one-shot failure injection, the sampler
//! reports whatever load it is told to, and transcoders are replaced by
//! `sh` scripts so supervision runs against real OS processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamvisor_core::testing::{ScriptCommandFactory, StaticSampler, HEALTHY_SCRIPT};
//!
//! let commands = ScriptCommandFactory::new(HEALTHY_SCRIPT);
//! commands.set_channel_script("c2", CRASHING_SCRIPT);
//!
//! let sampler = StaticSampler::new(4, 3.6, 40.0); // 90% load on 4 cores
//! ```

mod memory_channels;
mod memory_processes;
mod mock_gate;
mod sampler;
mod scripts;

pub use memory_channels::InMemoryChannelRepository;
pub use memory_processes::InMemoryStreamProcessRepository;
pub use mock_gate::MockSubscriptionGate;
pub use sampler::StaticSampler;
pub use scripts::{ScriptCommandFactory, CRASHING_SCRIPT, HEALTHY_SCRIPT, SILENT_SCRIPT};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::channel::{Channel, ChannelConfig, ChannelStatus, NewChannel, OutputTarget};

    /// A stopped channel that was never started.
    pub fn channel(id: &str, client_id: &str, config: ChannelConfig) -> Channel {
        let now = Utc::now();
        Channel {
            id: id.to_string(),
            client_id: client_id.to_string(),
            name: format!("Channel {}", id),
            status: ChannelStatus::Stopped,
            config,
            hls_endpoint: Some(format!("/hls/{}/index.m3u8", id)),
            total_uptime_secs: 0,
            restart_count: 0,
            last_start_time: None,
            last_stop_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// File input with segmented output only.
    pub fn hls_config() -> ChannelConfig {
        ChannelConfig::new("/media/loop.mp4")
    }

    /// Segmented output plus one push destination.
    pub fn push_config(url: &str) -> ChannelConfig {
        ChannelConfig::new("rtmp://ingest.local/live/in").with_output(OutputTarget::new("primary", url))
    }

    /// A configuration the planner rejects.
    pub fn invalid_config() -> ChannelConfig {
        let mut config = ChannelConfig::new("/media/loop.mp4");
        config.video_bitrate_kbps = 0;
        config
    }

    pub fn new_channel(client_id: &str, name: &str, config: ChannelConfig) -> NewChannel {
        NewChannel {
            id: None,
            client_id: client_id.to_string(),
            name: name.to_string(),
            config,
            hls_endpoint: None,
        }
    }
}
