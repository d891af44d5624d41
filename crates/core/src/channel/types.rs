//! Channel domain types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a channel.
///
/// `Stopped` and `Error` are resting states from which a start is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Stopped,
    Starting,
    Live,
    Error,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Stopped => "STOPPED",
            ChannelStatus::Starting => "STARTING",
            ChannelStatus::Live => "LIVE",
            ChannelStatus::Error => "ERROR",
        }
    }

    /// Whether a start may be issued from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, ChannelStatus::Stopped | ChannelStatus::Error)
    }

    /// Whether a restart may be issued from this status.
    pub fn can_restart(&self) -> bool {
        matches!(self, ChannelStatus::Live | ChannelStatus::Error)
    }

    /// Whether the channel currently occupies a concurrent-channel slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ChannelStatus::Starting | ChannelStatus::Live)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(ChannelStatus::Stopped),
            "STARTING" => Ok(ChannelStatus::Starting),
            "LIVE" => Ok(ChannelStatus::Live),
            "ERROR" => Ok(ChannelStatus::Error),
            other => Err(format!("unknown channel status: {}", other)),
        }
    }
}

/// A push destination (RTMP/RTMPS/SRT ingest of a third-party platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    /// Human-readable label, e.g. "youtube".
    pub label: String,
    /// Full ingest URL including the stream key.
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl OutputTarget {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Encoding and fan-out configuration of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Input URL or path handed to the transcoder.
    pub input_source: String,
    /// Output resolution as `WIDTHxHEIGHT`.
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_kbps: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    #[serde(default)]
    pub framerate: Option<u32>,
    #[serde(default)]
    pub output_targets: Vec<OutputTarget>,
    /// Segmented HTTP playlist output.
    #[serde(default = "default_true")]
    pub hls_enabled: bool,
    /// Short GOP / zero-latency tuning.
    #[serde(default)]
    pub low_latency: bool,
}

fn default_resolution() -> String {
    "1280x720".to_string()
}

fn default_video_bitrate() -> u32 {
    2500
}

fn default_audio_bitrate() -> u32 {
    128
}

impl ChannelConfig {
    pub fn new(input_source: impl Into<String>) -> Self {
        Self {
            input_source: input_source.into(),
            resolution: default_resolution(),
            video_bitrate_kbps: default_video_bitrate(),
            audio_bitrate_kbps: default_audio_bitrate(),
            framerate: None,
            output_targets: Vec::new(),
            hls_enabled: true,
            low_latency: false,
        }
    }

    pub fn with_output(mut self, target: OutputTarget) -> Self {
        self.output_targets.push(target);
        self
    }

    /// Enabled push destination URLs.
    pub fn destination_set(&self) -> BTreeSet<&str> {
        self.output_targets
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.url.as_str())
            .collect()
    }

    /// Whether moving from `self` to `other` needs the transcoder restarted.
    pub fn requires_restart(&self, other: &ChannelConfig) -> bool {
        self.resolution != other.resolution
            || self.video_bitrate_kbps != other.video_bitrate_kbps
            || self.hls_enabled != other.hls_enabled
            || self.destination_set() != other.destination_set()
    }
}

/// A live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub status: ChannelStatus,
    pub config: ChannelConfig,
    pub hls_endpoint: Option<String>,
    /// Accumulated seconds spent LIVE.
    pub total_uptime_secs: u64,
    pub restart_count: u32,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_stop_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub client_id: String,
    pub name: String,
    pub config: ChannelConfig,
    pub hls_endpoint: Option<String>,
}

/// Partial update of a channel. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input_source: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub framerate: Option<u32>,
    #[serde(default)]
    pub output_targets: Option<Vec<OutputTarget>>,
    #[serde(default)]
    pub hls_enabled: Option<bool>,
    #[serde(default)]
    pub low_latency: Option<bool>,
}

impl ChannelUpdate {
    /// Apply the update to a configuration, returning the merged result.
    pub fn apply_to(&self, config: &ChannelConfig) -> ChannelConfig {
        let mut merged = config.clone();
        if let Some(ref input) = self.input_source {
            merged.input_source = input.clone();
        }
        if let Some(ref resolution) = self.resolution {
            merged.resolution = resolution.clone();
        }
        if let Some(bitrate) = self.video_bitrate_kbps {
            merged.video_bitrate_kbps = bitrate;
        }
        if let Some(bitrate) = self.audio_bitrate_kbps {
            merged.audio_bitrate_kbps = bitrate;
        }
        if let Some(fps) = self.framerate {
            merged.framerate = Some(fps);
        }
        if let Some(ref targets) = self.output_targets {
            merged.output_targets = targets.clone();
        }
        if let Some(hls) = self.hls_enabled {
            merged.hls_enabled = hls;
        }
        if let Some(low_latency) = self.low_latency {
            merged.low_latency = low_latency;
        }
        merged
    }
}
