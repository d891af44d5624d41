//! Lifecycle and failure notifications.
//!
//! Every subscriber owns an unbounded queue, so publishing never blocks the
//! supervisor and a slow subscriber only grows its own backlog. Subscribers
//! that have been dropped are pruned on the next publish.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::channel::ChannelStatus;

/// Events published by the supervisor and the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    StreamFailure { channel_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    MaxRestartsExceeded { channel_id: String, attempts: u32 },
    #[serde(rename_all = "camelCase")]
    StreamRestarted {
        channel_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    StreamAborted { channel_id: String, reason: String },
    #[serde(rename_all = "camelCase")]
    RtmpConnectionFailure {
        channel_id: String,
        url: Option<String>,
        critical: bool,
        details: String,
    },
    #[serde(rename_all = "camelCase")]
    RtmpConnected { channel_id: String, url: Option<String> },
    /// The transcoder ended on its own without failing (exit code 0 or a
    /// signal). No restart follows.
    #[serde(rename_all = "camelCase")]
    StreamExited {
        channel_id: String,
        code: Option<i32>,
    },
    #[serde(rename_all = "camelCase")]
    StreamingStarted { channel_id: String },
    #[serde(rename_all = "camelCase")]
    StreamingStopped { channel_id: String },
    #[serde(rename_all = "camelCase")]
    ChannelStatusChanged {
        channel_id: String,
        from: ChannelStatus,
        to: ChannelStatus,
    },
}

impl StreamEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            StreamEvent::StreamFailure { channel_id, .. }
            | StreamEvent::MaxRestartsExceeded { channel_id, .. }
            | StreamEvent::StreamRestarted { channel_id, .. }
            | StreamEvent::StreamAborted { channel_id, .. }
            | StreamEvent::RtmpConnectionFailure { channel_id, .. }
            | StreamEvent::RtmpConnected { channel_id, .. }
            | StreamEvent::StreamExited { channel_id, .. }
            | StreamEvent::StreamingStarted { channel_id }
            | StreamEvent::StreamingStopped { channel_id }
            | StreamEvent::ChannelStatusChanged { channel_id, .. } => channel_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::StreamFailure { .. } => "streamFailure",
            StreamEvent::MaxRestartsExceeded { .. } => "maxRestartsExceeded",
            StreamEvent::StreamRestarted { .. } => "streamRestarted",
            StreamEvent::StreamAborted { .. } => "streamAborted",
            StreamEvent::RtmpConnectionFailure { .. } => "rtmpConnectionFailure",
            StreamEvent::RtmpConnected { .. } => "rtmpConnected",
            StreamEvent::StreamExited { .. } => "streamExited",
            StreamEvent::StreamingStarted { .. } => "streamingStarted",
            StreamEvent::StreamingStopped { .. } => "streamingStopped",
            StreamEvent::ChannelStatusChanged { .. } => "channelStatusChanged",
        }
    }
}

/// Event with its publish time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Publish point for stream events.
///
/// Cheaply cloneable; all clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EventEnvelope>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber.
    pub fn publish(&self, event: StreamEvent) {
        match &event {
            StreamEvent::StreamFailure { .. }
            | StreamEvent::MaxRestartsExceeded { .. }
            | StreamEvent::StreamAborted { .. } => {
                tracing::warn!(channel_id = %event.channel_id(), event = event.kind(), ?event, "Stream event");
            }
            _ => {
                tracing::info!(channel_id = %event.channel_id(), event = event.kind(), "Stream event");
            }
        }

        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };

        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
    }

    /// Register a subscriber. It receives every event published afterwards.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(tx);
        EventSubscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.iter().filter(|tx| !tx.is_closed()).count(),
            Err(poisoned) => poisoned.into_inner().iter().filter(|tx| !tx.is_closed()).count(),
        }
    }
}

/// Receiving side of an [`EventBus`] subscription.
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }

    /// Non-blocking poll.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.rx.try_recv().ok()
    }
}
