//! Stream process records: one supervised transcoder per channel.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteStreamProcessRepository;
pub use store::{ProcessStoreError, StreamProcessRepository};
pub use types::{HealthMetrics, NewStreamProcess, ProcessStatus, RecoveryPolicy, StreamProcess};
