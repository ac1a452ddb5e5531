/// file: src/client_state.rs
/// description: Connection state machine values and per-connection counters
use crate::transport::TransportKind;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// States in which the connection task is still running and will reach the server on its own.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ClientState {
    pub connection_id: String,
    pub socket_id: Option<String>,
    pub transport: Option<TransportKind>,
    pub reconnect_attempt: u32,
    pub total_reconnects: u64,
    pub messages_received: u64,
    pub events_dispatched: u64,
    pub malformed_packets: u64,
    pub created_at: Instant,
    pub connected_since: Option<Instant>,
    pub last_message_time: Option<Instant>,
    pub last_disconnection_time: Option<Instant>,
}

impl ClientState {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            socket_id: None,
            transport: None,
            reconnect_attempt: 0,
            total_reconnects: 0,
            messages_received: 0,
            events_dispatched: 0,
            malformed_packets: 0,
            created_at: Instant::now(),
            connected_since: None,
            last_message_time: None,
            last_disconnection_time: None,
        }
    }

    pub fn mark_connected(&mut self, socket_id: Option<String>, transport: TransportKind) {
        self.socket_id = socket_id;
        self.transport = Some(transport);
        self.reconnect_attempt = 0;
        self.connected_since = Some(Instant::now());
        self.last_message_time = Some(Instant::now());
    }

    pub fn mark_disconnected(&mut self) {
        self.socket_id = None;
        self.connected_since = None;
        self.last_disconnection_time = Some(Instant::now());
    }

    pub fn begin_reconnect(&mut self, attempt: u32) {
        self.reconnect_attempt = attempt;
        self.total_reconnects += 1;
    }

    pub fn record_message(&mut self) {
        self.last_message_time = Some(Instant::now());
        self.messages_received += 1;
    }

    pub fn record_dispatch(&mut self, handlers: usize) {
        self.events_dispatched += handlers as u64;
    }

    pub fn record_malformed(&mut self) {
        self.malformed_packets += 1;
    }
}

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
