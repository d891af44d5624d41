use thiserror::Error;

use crate::channel::{ChannelStatus, ChannelStoreError};
use crate::planner::PlanError;
use crate::process::ProcessStoreError;
use crate::subscription::SubscriptionError;
use crate::supervisor::SupervisorError;

/// Errors from channel lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Channel {0} is already active")]
    AlreadyActive(String),

    #[error("Channel {channel_id} cannot {operation} from {status}")]
    InvalidState {
        channel_id: String,
        operation: &'static str,
        status: ChannelStatus,
    },

    /// The client's plan does not allow the operation.
    #[error("Plan limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Channel store error: {0}")]
    Store(ChannelStoreError),

    #[error(transparent)]
    Process(#[from] ProcessStoreError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl From<ChannelStoreError> for LifecycleError {
    fn from(e: ChannelStoreError) -> Self {
        match e {
            ChannelStoreError::NotFound(id) => LifecycleError::NotFound(id),
            other => LifecycleError::Store(other),
        }
    }
}

impl LifecycleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LifecycleError::NotFound(_))
    }

    /// Rejected by a state precondition, with nothing mutated.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LifecycleError::AlreadyActive(_) | LifecycleError::InvalidState { .. }
        ) || matches!(self, LifecycleError::Supervisor(SupervisorError::AlreadyRunning(_)))
    }

    /// Bad request shape or configuration.
    pub fn is_validation(&self) -> bool {
        matches!(self, LifecycleError::Validation(_) | LifecycleError::Plan(_))
    }
}
