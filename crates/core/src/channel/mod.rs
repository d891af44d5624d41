//! Channels: the client-owned live-stream entities.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteChannelRepository;
pub use store::{ChannelRepository, ChannelStoreError};
pub use types::{Channel, ChannelConfig, ChannelStatus, ChannelUpdate, NewChannel, OutputTarget};
