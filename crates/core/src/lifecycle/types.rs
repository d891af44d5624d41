use serde::Serialize;

use crate::channel::Channel;
use crate::supervisor::StreamHealth;

/// Channel record together with its transcoder health, if one was ever
/// started.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusReport {
    pub channel: Channel,
    pub stream: Option<StreamHealth>,
}
