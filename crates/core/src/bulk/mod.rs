//! Bulk channel operations.
//!
//! Requests are queued by priority, then executed with every target
//! channel locked for the duration, a priority-scaled fan-out limit and
//! resource-based admission control. Results stay pollable in memory.

mod config;
mod error;
mod locks;
mod queue;
mod scheduler;
mod types;

pub use config::{SchedulerConfig, MAX_BATCH_CAP};
pub use error::BulkError;
pub use locks::{ChannelLockGuard, ChannelLocks};
pub use queue::{OperationQueue, QueueEntry};
pub use scheduler::{
    client_allowance, concurrency_limit, BulkOperationScheduler, ChannelOperationHandler,
    HandlerError, StreamCounter,
};
pub use types::{
    Availability, BulkOperationRequest, BulkOperationResult, BulkOperationType, BulkStatus,
    ChannelOperationResult, ChannelResultStatus,
};
