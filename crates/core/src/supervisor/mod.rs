//! Transcoder process supervision.
//!
//! The supervisor owns every channel's OS process:
//! - **Spawn**: builds the command from a [`StreamPlan`](crate::planner::StreamPlan)
//! - **Monitor**: parses diagnostic output, tracks liveness, persists heartbeats
//! - **Recover**: restarts failed streams with exponential backoff up to a ceiling
//! - **Terminate**: graceful signal, forced kill after the grace window

mod backoff;
mod command;
mod config;
mod error;
mod parser;
mod probe;
mod runner;
mod shutdown;
mod types;

pub use backoff::BackoffPolicy;
pub use command::{CommandFactory, FfmpegCommandFactory};
pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use parser::{OutputParser, OutputSignal};
pub use probe::{ConnectivityProbe, ProbeResult};
pub use runner::ProcessSupervisor;
pub use shutdown::shutdown_child;
pub use types::StreamHealth;
