//! One-shot reachability test for push destinations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use super::command::CommandFactory;
use super::parser::{OutputParser, OutputSignal};
use super::shutdown::shutdown_child;

/// Lines kept as evidence per probe.
const MAX_EVIDENCE: usize = 20;

/// Outcome of probing one destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub reachable: bool,
    /// The destination rejected us in a way a retry will not fix.
    pub critical: bool,
    pub error: Option<String>,
    /// Diagnostic lines that drove the verdict.
    pub evidence: Vec<String>,
    pub elapsed_ms: u64,
}

/// Publishes a short synthetic stream to a destination and judges the result.
///
/// A probe that is still publishing at the deadline is forced down and
/// judged on what it printed so far.
#[derive(Clone)]
pub struct ConnectivityProbe {
    commands: Arc<dyn CommandFactory>,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(commands: Arc<dyn CommandFactory>, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    pub async fn probe(&self, url: &str) -> ProbeResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let parser = OutputParser::new("", vec![url.to_string()]);

        let mut result = ProbeResult {
            url: url.to_string(),
            reachable: false,
            critical: false,
            error: None,
            evidence: Vec::new(),
            elapsed_ms: 0,
        };

        let mut child = match self.commands.probe_command(url, self.timeout).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to launch connectivity probe");
                result.error = Some(format!("failed to launch probe: {}", e));
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        let mut failure: Option<String> = None;
        let mut timed_out = false;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match timeout_at(deadline, lines.next_line()).await {
                    Ok(Ok(Some(line))) => {
                        let Some(signal) = parser.classify(&line) else {
                            continue;
                        };
                        match signal {
                            OutputSignal::PushFailure {
                                critical, message, ..
                            } => {
                                result.critical |= critical;
                                failure.get_or_insert(message.clone());
                                push_evidence(&mut result.evidence, message);
                            }
                            OutputSignal::Error { message } => {
                                failure.get_or_insert(message.clone());
                                push_evidence(&mut result.evidence, message);
                            }
                            OutputSignal::OutputOpened { .. } => {
                                push_evidence(&mut result.evidence, line);
                            }
                            OutputSignal::Progress { .. } | OutputSignal::SegmentWritten { .. } => {}
                        }
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        debug!(url = %url, error = %e, "Probe output read failed");
                        break;
                    }
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        let exit = if timed_out {
            shutdown_child(&mut child, Duration::ZERO).await.ok();
            None
        } else {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    timed_out = true;
                    shutdown_child(&mut child, Duration::ZERO).await.ok();
                    None
                }
            }
        };

        match failure {
            Some(message) => {
                result.reachable = false;
                result.error = Some(message);
            }
            None if timed_out => {
                // Still publishing without complaint when cut off.
                result.reachable = true;
            }
            None => match exit {
                Some(status) if status.success() => result.reachable = true,
                Some(status) => {
                    result.error = Some(format!("probe exited with {}", status));
                }
                None => {
                    result.error = Some("probe exit status unavailable".to_string());
                }
            },
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            url = %url,
            reachable = result.reachable,
            critical = result.critical,
            elapsed_ms = result.elapsed_ms,
            "Connectivity probe finished"
        );
        result
    }
}

fn push_evidence(evidence: &mut Vec<String>, line: String) {
    if evidence.len() < MAX_EVIDENCE {
        evidence.push(line);
    }
}
