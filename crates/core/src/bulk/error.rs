use thiserror::Error;

use crate::subscription::SubscriptionError;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Batch of {size} channels exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Priority {0} is outside 1..=10")]
    InvalidPriority(u8),

    #[error("Bulk operation not found: {0}")]
    NotFound(String),

    #[error("Bulk operation {operation_id} conflicts with locked channels: {}", channels.join(", "))]
    ChannelsLocked {
        operation_id: String,
        channels: Vec<String>,
    },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl BulkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BulkError::NotFound(_))
    }

    /// Rejected before anything was queued or touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BulkError::Validation(_) | BulkError::BatchTooLarge { .. } | BulkError::InvalidPriority(_)
        )
    }
}
