use thiserror::Error;

use crate::process::ProcessStoreError;

/// Errors from process supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The transcoder could not be spawned.
    #[error("Failed to spawn transcoder for channel {channel_id}: {reason}")]
    ProcessSpawn { channel_id: String, reason: String },

    #[error("Channel {0} already has a live transcoder")]
    AlreadyRunning(String),

    /// No stream process record, or no known plan, for the channel.
    #[error("No stream process for channel {0}")]
    NotFound(String),

    #[error("Channel {channel_id} reached the restart limit after {attempts} attempts")]
    MaxRestartsExceeded { channel_id: String, attempts: u32 },

    #[error("Process store error: {0}")]
    Store(#[from] ProcessStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn spawn_failed(channel_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            channel_id: channel_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SupervisorError::NotFound(_) => true,
            SupervisorError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}
