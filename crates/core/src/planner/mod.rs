//! Derivation of concrete transcoder parameters from channel configuration.

mod default;

pub use default::DefaultStreamPlanner;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::Channel;

/// One destination of the transcoder's fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputDescriptor {
    /// Segmented HTTP playlist written to disk.
    Hls {
        playlist_path: PathBuf,
        segment_duration_secs: u32,
        playlist_size: u32,
    },
    /// Push to a third-party ingest.
    Push { url: String, label: String },
}

impl OutputDescriptor {
    /// Short identifier stored on the process record.
    pub fn target(&self) -> String {
        match self {
            OutputDescriptor::Hls { playlist_path, .. } => {
                format!("hls:{}", playlist_path.display())
            }
            OutputDescriptor::Push { url, .. } => url.clone(),
        }
    }
}

/// Concrete invocation parameters for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPlan {
    pub channel_id: String,
    pub input_source: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub framerate: Option<u32>,
    pub low_latency: bool,
    pub outputs: Vec<OutputDescriptor>,
}

impl StreamPlan {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn hls_output(&self) -> Option<&OutputDescriptor> {
        self.outputs
            .iter()
            .find(|o| matches!(o, OutputDescriptor::Hls { .. }))
    }

    pub fn push_urls(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter_map(|o| match o {
                OutputDescriptor::Push { url, .. } => Some(url.as_str()),
                OutputDescriptor::Hls { .. } => None,
            })
            .collect()
    }

    pub fn targets(&self) -> Vec<String> {
        self.outputs.iter().map(OutputDescriptor::target).collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),
}

impl PlanError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Turns a channel into a [`StreamPlan`]. Implementations are pure.
pub trait StreamPlanner: Send + Sync {
    fn plan(&self, channel: &Channel) -> Result<StreamPlan, PlanError>;

    /// Public playlist location for a channel with segmented output.
    fn hls_endpoint(&self, channel_id: &str) -> String {
        format!("/hls/{}/index.m3u8", channel_id)
    }
}
