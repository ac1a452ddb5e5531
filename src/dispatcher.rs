// file: src/dispatcher.rs
// description: Named-event handler registration, disposers and typed outbound sends

use crate::{
    client_state::lock,
    connection::ConnectionManager,
    error::{RealtimeError, Result},
    monitoring,
    protocol::OutboundMessage,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};
use tracing::{debug, warn};

/// Callback invoked with the event payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registered handlers per event name, kept in registration order.
#[derive(Default)]
pub(crate) struct HandlerTable {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Handler)>>,
}

impl HandlerTable {
    pub(crate) fn insert(&mut self, event: &str, handler: Handler) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn remove_id(&mut self, event: &str, id: u64) -> bool {
        self.remove_where(event, |entry_id, _| entry_id == id)
    }

    /// Remove every registration of `handler` (by identity) under `event`.
    pub(crate) fn remove_handler(&mut self, event: &str, handler: &Handler) -> bool {
        self.remove_where(event, |_, registered| {
            std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(handler))
        })
    }

    fn remove_where(&mut self, event: &str, mut matches: impl FnMut(u64, &Handler) -> bool) -> bool {
        let Some(entries) = self.by_event.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, handler)| !matches(*id, handler));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_event.remove(event);
        }
        removed
    }

    pub(crate) fn handlers_for(&self, event: &str) -> Vec<Handler> {
        self.by_event
            .get(event)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }

    /// Drop every registration. Ids keep counting up, so disposers issued before
    /// the clear can never match a later registration.
    pub(crate) fn clear(&mut self) {
        self.by_event.clear();
    }
}

struct DisposeTarget {
    table: Weak<Mutex<HandlerTable>>,
    event: String,
    id: u64,
}

/// Removes exactly the registration it was returned for.
///
/// Calling it more than once is a no-op; clones share the same one-shot state.
/// Dropping a disposer does not unregister the handler.
#[derive(Clone)]
pub struct Disposer {
    target: Arc<Mutex<Option<DisposeTarget>>>,
}

impl Disposer {
    fn new(table: &Arc<Mutex<HandlerTable>>, event: &str, id: u64) -> Self {
        Self {
            target: Arc::new(Mutex::new(Some(DisposeTarget {
                table: Arc::downgrade(table),
                event: event.to_string(),
                id,
            }))),
        }
    }

    pub fn dispose(&self) {
        let Some(target) = lock(&self.target).take() else {
            return;
        };
        if let Some(table) = target.table.upgrade() {
            let removed = lock(&table).remove_id(&target.event, target.id);
            debug!(event = %target.event, removed, "Handler disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.target).is_none()
    }

    /// The disposer as a plain callback, for APIs that take cleanup closures.
    pub fn into_fn(self) -> impl Fn() + Send + Sync + 'static {
        move || self.dispose()
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Subscribe to named server events and send named events to the server.
#[derive(Clone)]
pub struct EventDispatcher {
    manager: ConnectionManager,
}

impl EventDispatcher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Register `handler` for `event`, connecting first if needed.
    ///
    /// Registering the same `Arc` twice makes it run twice per event. The
    /// registration holds until it is disposed or the manager disconnects.
    pub fn on(&self, event: &str, handler: Handler) -> Result<Disposer> {
        let connection = self.manager.connect()?;
        let table = self.manager.handlers();
        let id = lock(table).insert(event, handler);
        debug!(event, connection_id = %connection.id(), "Handler registered");
        Ok(Disposer::new(table, event, id))
    }

    pub fn on_fn<F>(&self, event: &str, handler: F) -> Result<Disposer>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(event, Arc::new(handler))
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// Payloads that do not decode are logged and skipped; the handler never sees them.
    pub fn on_typed<T, F>(&self, event: &str, handler: F) -> Result<Disposer>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.on_fn(event, move |payload| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(value) => handler(value),
                Err(e) => {
                    monitoring::MALFORMED_PAYLOAD_COUNTER.increment(1);
                    let err = RealtimeError::MalformedPayload {
                        event: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                }
            }
        })
    }

    /// Remove every registration of `handler` for `event`.
    ///
    /// Never opens a connection; returns false when there was nothing to remove.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        lock(self.manager.handlers()).remove_handler(event, handler)
    }

    /// Send `payload` under `event`, connecting first if needed.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.manager.connect()?.emit(event, payload)
    }

    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.manager
            .connect()?
            .emit(message.event_name(), message.payload())
    }

    /// Send `message` only if a connection is up or still being retried.
    ///
    /// Returns false, and sends nothing, once the connection has failed or been
    /// torn down; getting it back then takes an explicit connect.
    pub fn send_if_live(&self, message: &OutboundMessage) -> Result<bool> {
        let Some(connection) = self.manager.live() else {
            debug!(event = message.event_name(), "No live connection, skipping send");
            return Ok(false);
        };
        connection.emit(message.event_name(), message.payload())?;
        Ok(true)
    }

    /// Handlers currently registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        lock(self.manager.handlers()).count(event)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}
