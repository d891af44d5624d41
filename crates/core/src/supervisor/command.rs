//! Transcoder invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::planner::{OutputDescriptor, StreamPlan};

/// Builds the OS commands the supervisor runs.
///
/// Commands must write diagnostics to stderr; the supervisor pipes it.
pub trait CommandFactory: Send + Sync {
    /// Long-running transcoder for a plan.
    fn stream_command(&self, plan: &StreamPlan) -> Command;

    /// Short synthetic publish to one push destination.
    fn probe_command(&self, url: &str, duration: Duration) -> Command;
}

/// Production factory invoking ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegCommandFactory {
    ffmpeg_path: PathBuf,
    log_level: String,
}

impl FfmpegCommandFactory {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            log_level: log_level.into(),
        }
    }

    /// Builds ffmpeg arguments for a plan.
    pub fn stream_args(&self, plan: &StreamPlan) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
        ];

        // Files are paced in real time; network inputs already are.
        if !plan.input_source.contains("://") {
            args.push("-re".to_string());
        }
        args.extend(["-i".to_string(), plan.input_source.clone()]);

        // Video
        let gop = plan.framerate.unwrap_or(30) * 2;
        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a:0?".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-b:v".to_string(),
            format!("{}k", plan.video_bitrate_kbps),
            "-maxrate".to_string(),
            format!("{}k", plan.video_bitrate_kbps),
            "-bufsize".to_string(),
            format!("{}k", plan.video_bitrate_kbps * 2),
            "-vf".to_string(),
            format!("scale={}:{}", plan.width, plan.height),
            "-g".to_string(),
            gop.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);
        if let Some(fps) = plan.framerate {
            args.extend(["-r".to_string(), fps.to_string()]);
        }
        if plan.low_latency {
            args.extend(["-tune".to_string(), "zerolatency".to_string()]);
        }

        // Audio
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", plan.audio_bitrate_kbps),
            "-ar".to_string(),
            "44100".to_string(),
        ]);

        // Progress on stderr for the output parser
        args.extend([
            "-stats".to_string(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]);

        // One encode, fanned out by the tee muxer
        args.extend([
            "-flags".to_string(),
            "+global_header".to_string(),
            "-f".to_string(),
            "tee".to_string(),
            tee_spec(&plan.outputs),
        ]);

        args
    }

    pub fn probe_args(&self, url: &str, duration: Duration) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-re".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            "testsrc=size=320x240:rate=15".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            "sine=frequency=440".to_string(),
            "-t".to_string(),
            duration.as_secs().max(1).to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-f".to_string(),
            push_format(url).to_string(),
            url.to_string(),
        ]
    }
}

fn push_format(url: &str) -> &'static str {
    if url.starts_with("srt://") {
        "mpegts"
    } else {
        "flv"
    }
}

/// `[opts]target|[opts]target` for the tee muxer.
fn tee_spec(outputs: &[OutputDescriptor]) -> String {
    outputs
        .iter()
        .map(|output| match output {
            OutputDescriptor::Hls {
                playlist_path,
                segment_duration_secs,
                playlist_size,
            } => {
                let segments = playlist_path
                    .parent()
                    .map(|dir| dir.join("segment_%05d.ts"))
                    .unwrap_or_else(|| PathBuf::from("segment_%05d.ts"));
                format!(
                    "[f=hls:hls_time={}:hls_list_size={}:hls_flags=delete_segments+independent_segments:hls_segment_filename={}]{}",
                    segment_duration_secs,
                    playlist_size,
                    segments.display(),
                    playlist_path.display()
                )
            }
            // A failing push slave must not take the primary output down.
            OutputDescriptor::Push { url, .. } => {
                format!("[f={}:onfail=ignore]{}", push_format(url), url)
            }
        })
        .collect::<Vec<_>>()
        .join("|")
}

impl CommandFactory for FfmpegCommandFactory {
    fn stream_command(&self, plan: &StreamPlan) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.stream_args(plan))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn probe_command(&self, url: &str, duration: Duration) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.probe_args(url, duration))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
