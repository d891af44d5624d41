//! Channel lifecycle: the state machine tying persistence, plan limits and
//! process supervision together.

mod error;
mod manager;
mod types;

pub use error::LifecycleError;
pub use manager::ChannelLifecycleManager;
pub use types::ChannelStatusReport;
