//! Shell scripts standing in for the transcoder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Command;

use crate::planner::StreamPlan;
use crate::supervisor::CommandFactory;

/// Writes a segment confirmation every 100ms until killed.
pub const HEALTHY_SCRIPT: &str = r#"i=0; while true; do i=$((i+1)); echo "[hls @ 0x1] Opening 'segment_$i.ts' for writing" >&2; sleep 0.1; done"#;

/// Dies right away with a non-zero code.
pub const CRASHING_SCRIPT: &str = r#"echo "Input stream ended unexpectedly" >&2; exit 1"#;

/// Stays alive without producing any output.
pub const SILENT_SCRIPT: &str = "exec sleep 30";

const MISSING_PROGRAM: &str = "/nonexistent/streamvisor-test-transcoder";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`CommandFactory`] running `sh -c <script>`.
///
/// Stream scripts receive the channel id as `$1`; probe scripts receive the
/// destination URL. Per-channel overrides take precedence over the default
/// stream script.
pub struct ScriptCommandFactory {
    program: PathBuf,
    stream_script: Mutex<String>,
    channel_scripts: Mutex<HashMap<String, String>>,
    probe_script: String,
    launches: Mutex<Vec<String>>,
}

impl ScriptCommandFactory {
    pub fn new(stream_script: &str) -> Self {
        Self {
            program: PathBuf::from("sh"),
            stream_script: Mutex::new(stream_script.to_string()),
            channel_scripts: Mutex::new(HashMap::new()),
            probe_script: "exit 0".to_string(),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Every spawn fails because the program does not exist.
    pub fn missing_binary() -> Self {
        Self {
            program: PathBuf::from(MISSING_PROGRAM),
            ..Self::new("exit 0")
        }
    }

    pub fn with_probe_script(mut self, script: &str) -> Self {
        self.probe_script = script.to_string();
        self
    }

    pub fn set_stream_script(&self, script: &str) {
        *lock(&self.stream_script) = script.to_string();
    }

    pub fn set_channel_script(&self, channel_id: &str, script: &str) {
        lock(&self.channel_scripts).insert(channel_id.to_string(), script.to_string());
    }

    pub fn clear_channel_script(&self, channel_id: &str) {
        lock(&self.channel_scripts).remove(channel_id);
    }

    /// Channel ids in the order their transcoders were built.
    pub fn launches(&self) -> Vec<String> {
        lock(&self.launches).clone()
    }

    pub fn launch_count(&self, channel_id: &str) -> usize {
        lock(&self.launches)
            .iter()
            .filter(|id| id.as_str() == channel_id)
            .count()
    }

    fn command(&self, script: &str, arg: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(script)
            .arg("sh")
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CommandFactory for ScriptCommandFactory {
    fn stream_command(&self, plan: &StreamPlan) -> Command {
        let script = lock(&self.channel_scripts)
            .get(&plan.channel_id)
            .cloned()
            .unwrap_or_else(|| lock(&self.stream_script).clone());
        lock(&self.launches).push(plan.channel_id.clone());
        self.command(&script, &plan.channel_id)
    }

    fn probe_command(&self, url: &str, _duration: Duration) -> Command {
        self.command(&self.probe_script, url)
    }
}
