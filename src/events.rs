/// file: src/events.rs
/// description: Lifecycle notifications and the bounded feed that decouples handlers from presentation
use crate::{
    client_state::ConnectionState,
    protocol::{JobProgress, RealtimeFeatures, RealtimePrediction, RecordingUpdate},
    stream::StreamSnapshot,
    transport::TransportKind,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connecting {
        connection_id: String,
    },
    Connected {
        connection_id: String,
        transport: TransportKind,
        reconnected: bool,
    },
    Disconnected {
        connection_id: String,
        reason: String,
    },
    Reconnecting {
        connection_id: String,
        attempt: u32,
        delay: Duration,
    },
    Error {
        connection_id: String,
        message: String,
    },
    Failed {
        connection_id: String,
        attempts: u32,
    },
}

impl LifecycleEvent {
    pub fn connection_id(&self) -> &str {
        match self {
            LifecycleEvent::Connecting { connection_id }
            | LifecycleEvent::Connected { connection_id, .. }
            | LifecycleEvent::Disconnected { connection_id, .. }
            | LifecycleEvent::Reconnecting { connection_id, .. }
            | LifecycleEvent::Error { connection_id, .. }
            | LifecycleEvent::Failed { connection_id, .. } => connection_id,
        }
    }

    /// The state this notification moves the connection into, if any.
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            LifecycleEvent::Connecting { .. } => Some(ConnectionState::Connecting),
            LifecycleEvent::Connected { .. } => Some(ConnectionState::Connected),
            LifecycleEvent::Reconnecting { .. } => Some(ConnectionState::Reconnecting),
            LifecycleEvent::Failed { .. } => Some(ConnectionState::Failed),
            LifecycleEvent::Disconnected { .. } | LifecycleEvent::Error { .. } => None,
        }
    }
}

pub(crate) const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Everything the presentation layer renders.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Lifecycle(LifecycleEvent),
    JobProgress(JobProgress),
    RecordingUpdate(RecordingUpdate),
    Features(RealtimeFeatures),
    Prediction(RealtimePrediction),
    Snapshot(Arc<StreamSnapshot>),
    Stopping,
}

// Bounded so a stalled renderer sheds feed events instead of growing memory;
// producers use try_send and drop on overflow.
const FEED_CHANNEL_CAPACITY: usize = 1_024;

pub type FeedSender = mpsc::Sender<FeedEvent>;
pub type FeedReceiver = mpsc::Receiver<FeedEvent>;

pub fn create_feed_channel() -> (FeedSender, FeedReceiver) {
    mpsc::channel(FEED_CHANNEL_CAPACITY)
}
