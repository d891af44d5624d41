use std::path::PathBuf;

use super::{OutputDescriptor, PlanError, StreamPlan, StreamPlanner};
use crate::channel::Channel;
use crate::supervisor::SupervisorConfig;

const PUSH_SCHEMES: &[&str] = &["rtmp://", "rtmps://", "srt://"];

/// Planner writing playlists under `hls_root/<channel_id>/index.m3u8`.
#[derive(Debug, Clone)]
pub struct DefaultStreamPlanner {
    hls_root: PathBuf,
    segment_duration_secs: u32,
    playlist_size: u32,
}

impl DefaultStreamPlanner {
    pub fn new(hls_root: impl Into<PathBuf>, segment_duration_secs: u32, playlist_size: u32) -> Self {
        Self {
            hls_root: hls_root.into(),
            segment_duration_secs,
            playlist_size,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.hls_root.clone(),
            config.segment_duration_secs,
            config.playlist_size,
        )
    }
}

fn parse_resolution(resolution: &str) -> Result<(u32, u32), PlanError> {
    let (w, h) = resolution
        .split_once('x')
        .ok_or_else(|| PlanError::invalid(format!("malformed resolution '{}'", resolution)))?;
    let width: u32 = w
        .trim()
        .parse()
        .map_err(|_| PlanError::invalid(format!("malformed resolution '{}'", resolution)))?;
    let height: u32 = h
        .trim()
        .parse()
        .map_err(|_| PlanError::invalid(format!("malformed resolution '{}'", resolution)))?;
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(PlanError::invalid(format!(
            "resolution '{}' must have positive even dimensions",
            resolution
        )));
    }
    Ok((width, height))
}

impl StreamPlanner for DefaultStreamPlanner {
    fn plan(&self, channel: &Channel) -> Result<StreamPlan, PlanError> {
        let config = &channel.config;

        if config.input_source.trim().is_empty() {
            return Err(PlanError::invalid("input source is empty"));
        }
        let (width, height) = parse_resolution(&config.resolution)?;
        if config.video_bitrate_kbps == 0 {
            return Err(PlanError::invalid("video bitrate must be positive"));
        }
        if config.audio_bitrate_kbps == 0 {
            return Err(PlanError::invalid("audio bitrate must be positive"));
        }
        if config.framerate == Some(0) {
            return Err(PlanError::invalid("framerate must be positive"));
        }

        let mut outputs = Vec::new();
        if config.hls_enabled {
            outputs.push(OutputDescriptor::Hls {
                playlist_path: self.hls_root.join(&channel.id).join("index.m3u8"),
                segment_duration_secs: self.segment_duration_secs,
                playlist_size: self.playlist_size,
            });
        }
        for target in config.output_targets.iter().filter(|t| t.enabled) {
            if !PUSH_SCHEMES.iter().any(|s| target.url.starts_with(s)) {
                return Err(PlanError::invalid(format!(
                    "push destination '{}' must use rtmp, rtmps or srt",
                    target.label
                )));
            }
            outputs.push(OutputDescriptor::Push {
                url: target.url.clone(),
                label: target.label.clone(),
            });
        }
        if outputs.is_empty() {
            return Err(PlanError::invalid("channel has no enabled outputs"));
        }

        Ok(StreamPlan {
            channel_id: channel.id.clone(),
            input_source: config.input_source.clone(),
            width,
            height,
            video_bitrate_kbps: config.video_bitrate_kbps,
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            framerate: config.framerate,
            low_latency: config.low_latency,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, OutputTarget};
    use crate::testing::fixtures;

    fn planner() -> DefaultStreamPlanner {
        DefaultStreamPlanner::new("/var/hls", 4, 6)
    }

    #[test]
    fn test_plan_hls_and_push() {
        let config = ChannelConfig::new("rtmp://ingest.local/live/in")
            .with_output(OutputTarget::new("yt", "rtmp://a.rtmp.youtube.com/live2/k"))
            .with_output(OutputTarget::new("srt", "srt://relay.example:9000"));
        let channel = fixtures::channel("c1", "acme", config);

        let plan = planner().plan(&channel).unwrap();
        assert_eq!(plan.resolution(), "1280x720");
        assert_eq!(plan.outputs.len(), 3);
        assert_eq!(
            plan.hls_output(),
            Some(&OutputDescriptor::Hls {
                playlist_path: PathBuf::from("/var/hls/c1/index.m3u8"),
                segment_duration_secs: 4,
                playlist_size: 6,
            })
        );
        assert_eq!(
            plan.push_urls(),
            vec!["rtmp://a.rtmp.youtube.com/live2/k", "srt://relay.example:9000"]
        );
        assert_eq!(plan.targets()[0], "hls:/var/hls/c1/index.m3u8");
    }

    #[test]
    fn test_disabled_targets_are_skipped() {
        let mut target = OutputTarget::new("yt", "rtmp://a.example/live/k");
        target.enabled = false;
        let config = ChannelConfig::new("in").with_output(target);
        let plan = planner()
            .plan(&fixtures::channel("c1", "acme", config))
            .unwrap();
        assert!(plan.push_urls().is_empty());
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let cases: Vec<(ChannelConfig, &str)> = vec![
            (ChannelConfig::new("  "), "input"),
            (
                ChannelConfig {
                    resolution: "720p".to_string(),
                    ..ChannelConfig::new("in")
                },
                "resolution",
            ),
            (
                ChannelConfig {
                    resolution: "1281x720".to_string(),
                    ..ChannelConfig::new("in")
                },
                "even",
            ),
            (
                ChannelConfig {
                    video_bitrate_kbps: 0,
                    ..ChannelConfig::new("in")
                },
                "video bitrate",
            ),
            (
                ChannelConfig {
                    hls_enabled: false,
                    ..ChannelConfig::new("in")
                },
                "no enabled outputs",
            ),
            (
                ChannelConfig::new("in").with_output(OutputTarget::new("web", "https://x.example")),
                "rtmp",
            ),
        ];

        for (config, needle) in cases {
            let err = planner()
                .plan(&fixtures::channel("c1", "acme", config))
                .unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected '{}' in '{}'",
                needle,
                err
            );
        }
    }

    #[test]
    fn test_default_hls_endpoint() {
        assert_eq!(planner().hls_endpoint("c9"), "/hls/c9/index.m3u8");
    }
}
