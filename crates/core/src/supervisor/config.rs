use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `[supervisor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Root directory for playlists and segments.
    #[serde(default = "default_hls_root")]
    pub hls_root: PathBuf,
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u32,
    /// Segments kept in the live playlist.
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Wait after the graceful signal before a forced kill.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,
    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
    /// Pause between terminating the old process and spawning the new one.
    #[serde(default = "default_restart_cleanup_delay_ms")]
    pub restart_cleanup_delay_ms: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Healthy running time after which the restart attempt counter resets.
    #[serde(default = "default_attempt_reset_after_secs")]
    pub attempt_reset_after_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_ffmpeg_log_level")]
    pub ffmpeg_log_level: String,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_hls_root() -> PathBuf {
    PathBuf::from("./hls")
}

fn default_segment_duration_secs() -> u32 {
    4
}

fn default_playlist_size() -> u32 {
    6
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_termination_grace_ms() -> u64 {
    5000
}

fn default_restart_base_delay_ms() -> u64 {
    1000
}

fn default_restart_max_delay_ms() -> u64 {
    30_000
}

fn default_restart_cleanup_delay_ms() -> u64 {
    500
}

fn default_max_restarts() -> u32 {
    3
}

fn default_attempt_reset_after_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    15
}

fn default_ffmpeg_log_level() -> String {
    "info".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            hls_root: default_hls_root(),
            segment_duration_secs: default_segment_duration_secs(),
            playlist_size: default_playlist_size(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            termination_grace_ms: default_termination_grace_ms(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
            restart_cleanup_delay_ms: default_restart_cleanup_delay_ms(),
            max_restarts: default_max_restarts(),
            attempt_reset_after_secs: default_attempt_reset_after_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            ffmpeg_log_level: default_ffmpeg_log_level(),
        }
    }
}

impl SupervisorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn restart_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.restart_cleanup_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
