// file: src/channels.rs
// description: Recording rooms and job subscriptions, with membership tracking and rejoin

use crate::{
    client_state::lock,
    connection::ConnectionManager,
    error::{RealtimeError, Result},
    events::LifecycleEvent,
    protocol::OutboundMessage,
};
use std::{
    collections::BTreeSet,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    RecordingRoom,
    JobSubscription,
}

/// A server-side group the client can be a member of.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    pub kind: ChannelKind,
    pub id: String,
}

impl Channel {
    pub fn recording(recording_id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::RecordingRoom,
            id: recording_id.into(),
        }
    }

    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::JobSubscription,
            id: job_id.into(),
        }
    }

    pub fn join_message(&self) -> OutboundMessage {
        match self.kind {
            ChannelKind::RecordingRoom => OutboundMessage::JoinRecording {
                recording_id: self.id.clone(),
            },
            ChannelKind::JobSubscription => OutboundMessage::SubscribeJob {
                job_id: self.id.clone(),
            },
        }
    }

    pub fn leave_message(&self) -> OutboundMessage {
        match self.kind {
            ChannelKind::RecordingRoom => OutboundMessage::LeaveRecording {
                recording_id: self.id.clone(),
            },
            ChannelKind::JobSubscription => OutboundMessage::UnsubscribeJob {
                job_id: self.id.clone(),
            },
        }
    }

    /// Room name the server uses for this channel.
    pub fn room_name(&self) -> String {
        match self.kind {
            ChannelKind::RecordingRoom => format!("recording_{}", self.id),
            ChannelKind::JobSubscription => format!("job_{}", self.id),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.room_name())
    }
}

/// What happens to memberships when the connection comes back after a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejoinPolicy {
    /// Callers re-issue joins themselves, e.g. via [`ChannelRegistry::rejoin_all`].
    #[default]
    Manual,
    /// Every tracked membership is re-sent after each reconnection.
    Automatic,
}

impl FromStr for RejoinPolicy {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(RejoinPolicy::Manual),
            "auto" | "automatic" => Ok(RejoinPolicy::Automatic),
            other => Err(RealtimeError::InvalidConfig(format!(
                "unknown rejoin policy '{other}' (expected manual or auto)"
            ))),
        }
    }
}

pub struct ChannelRegistry {
    manager: ConnectionManager,
    members: Arc<Mutex<BTreeSet<Channel>>>,
    policy: RejoinPolicy,
    rejoin_task: Option<JoinHandle<()>>,
}

impl ChannelRegistry {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            members: Arc::new(Mutex::new(BTreeSet::new())),
            policy: RejoinPolicy::Manual,
            rejoin_task: None,
        }
    }

    /// Registry with the given policy. `Automatic` needs a tokio runtime to watch reconnections.
    pub fn with_policy(manager: ConnectionManager, policy: RejoinPolicy) -> Result<Self> {
        let mut registry = Self::new(manager);
        registry.policy = policy;

        if policy == RejoinPolicy::Automatic {
            let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
            let lifecycle = registry.manager.subscribe_lifecycle();
            registry.rejoin_task = Some(runtime.spawn(rejoin_on_reconnect(
                registry.manager.clone(),
                registry.members.clone(),
                lifecycle,
            )));
        }
        Ok(registry)
    }

    pub fn policy(&self) -> RejoinPolicy {
        self.policy
    }

    /// Join `channel`, connecting first if needed.
    ///
    /// Joining twice sends the join request twice; membership is tracked once.
    pub fn join(&self, channel: Channel) -> Result<()> {
        let connection = self.manager.connect()?;
        let message = channel.join_message();
        connection.emit(message.event_name(), message.payload())?;
        info!(room = %channel, "Joined channel");
        lock(&self.members).insert(channel);
        Ok(())
    }

    /// Leave `channel`. Without a live connection nothing is sent and nothing is opened.
    pub fn leave(&self, channel: &Channel) {
        if let Some(connection) = self.manager.live() {
            let message = channel.leave_message();
            if let Err(e) = connection.emit(message.event_name(), message.payload()) {
                debug!(room = %channel, "Leave not sent: {}", e);
            }
        }
        if lock(&self.members).remove(channel) {
            info!(room = %channel, "Left channel");
        }
    }

    pub fn join_recording(&self, recording_id: &str) -> Result<()> {
        self.join(Channel::recording(recording_id))
    }

    pub fn leave_recording(&self, recording_id: &str) {
        self.leave(&Channel::recording(recording_id))
    }

    pub fn subscribe_job(&self, job_id: &str) -> Result<()> {
        self.join(Channel::job(job_id))
    }

    pub fn unsubscribe_job(&self, job_id: &str) {
        self.leave(&Channel::job(job_id))
    }

    /// Re-send join requests for every tracked membership. Returns how many were sent.
    pub fn rejoin_all(&self) -> Result<usize> {
        rejoin(&self.manager, &self.members)
    }

    pub fn members(&self) -> Vec<Channel> {
        lock(&self.members).iter().cloned().collect()
    }

    pub fn is_member(&self, channel: &Channel) -> bool {
        lock(&self.members).contains(channel)
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.rejoin_task.take() {
            task.abort();
        }
    }
}

fn rejoin(manager: &ConnectionManager, members: &Mutex<BTreeSet<Channel>>) -> Result<usize> {
    let channels: Vec<Channel> = lock(members).iter().cloned().collect();
    if channels.is_empty() {
        return Ok(0);
    }

    let connection = manager.connect()?;
    for channel in &channels {
        let message = channel.join_message();
        connection.emit(message.event_name(), message.payload())?;
    }
    info!(count = channels.len(), "Rejoined channels");
    Ok(channels.len())
}

async fn rejoin_on_reconnect(
    manager: ConnectionManager,
    members: Arc<Mutex<BTreeSet<Channel>>>,
    mut lifecycle: broadcast::Receiver<LifecycleEvent>,
) {
    loop {
        match lifecycle.recv().await {
            Ok(LifecycleEvent::Connected {
                reconnected: true, ..
            }) => {
                if let Err(e) = rejoin(&manager, &members) {
                    warn!("Automatic rejoin failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lifecycle listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_map_to_room_names_and_messages() {
        let room = Channel::recording("42");
        assert_eq!(room.room_name(), "recording_42");
        assert_eq!(room.join_message().event_name(), "join_recording");
        assert_eq!(room.leave_message().event_name(), "leave_recording");

        let job = Channel::job("J7");
        assert_eq!(job.to_string(), "job_J7");
        assert_eq!(job.join_message().event_name(), "subscribe_job");
        assert_eq!(job.leave_message().event_name(), "unsubscribe_job");
    }

    #[test]
    fn rejoin_policy_parses() {
        assert_eq!("auto".parse::<RejoinPolicy>().unwrap(), RejoinPolicy::Automatic);
        assert_eq!("Manual".parse::<RejoinPolicy>().unwrap(), RejoinPolicy::Manual);
        assert!("sometimes".parse::<RejoinPolicy>().is_err());
    }
}
