// file: src/connection.rs
// description: Connection manager, connection task and bounded reconnection scheduler
// reference: https://socket.io/docs/v4/client-offline-behavior/

use crate::{
    client_state::{ClientState, ConnectionState, lock},
    config::{Config, ReconnectPolicy, ServerConfig},
    dispatcher::HandlerTable,
    error::{RealtimeError, Result},
    events::{LIFECYCLE_CHANNEL_CAPACITY, LifecycleEvent},
    monitoring,
    protocol::{EnginePacket, OpenInfo, SocketPacket, names},
    transport::{Connector, NetworkConnector, TransportKind, TransportLink},
};
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, trace, warn};

/// Sends issued before the handshake completes wait here; the oldest are dropped past this.
pub(crate) const PENDING_BUFFER_CAPACITY: usize = 1_000;

enum Command {
    Emit { name: String, payload: Value },
    Shutdown,
}

pub(crate) struct ConnectionShared {
    id: String,
    state_tx: watch::Sender<ConnectionState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
    stats: Mutex<ClientState>,
}

impl ConnectionShared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(connection_id = %self.id, from = %previous, to = %state, "connection state changed");
        }
    }
}

/// Handle to the single live connection. Cheap to clone; all clones are the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether `other` is a handle to this very connection instance.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue `payload` for the server under `name`.
    ///
    /// Sends made while the connection is still being established are buffered and
    /// flushed in order after the handshake.
    pub fn emit(&self, name: &str, payload: Value) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RealtimeError::ConnectionClosed);
        }
        self.shared
            .cmd_tx
            .send(Command::Emit {
                name: name.to_string(),
                payload,
            })
            .map_err(|_| RealtimeError::ConnectionClosed)
    }

    pub fn stats(&self) -> ClientState {
        lock(&self.shared.stats).clone()
    }

}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

struct Live {
    connection: Connection,
    task: JoinHandle<()>,
}

impl Live {
    fn request_shutdown(&self) {
        self.connection.shared.closed.store(true, Ordering::Release);
        let _ = self.connection.shared.cmd_tx.send(Command::Shutdown);
    }
}

struct ManagerInner {
    server: ServerConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    // Outlives individual connections; cleared only by `disconnect()`.
    handlers: Arc<Mutex<HandlerTable>>,
    live: Mutex<Option<Live>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let live = self
            .live
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(live) = live {
            live.request_shutdown();
        }
    }
}

/// Owner of the process-wide connection.
///
/// Construct one at startup and hand clones to every component that needs the
/// socket; all clones share the same connection slot.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(server: ServerConfig, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                server,
                policy,
                connector,
                lifecycle_tx,
                handlers: Arc::new(Mutex::new(HandlerTable::default())),
                live: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let connector = NetworkConnector::new(config.server.url.clone(), config.server.timeout)?;
        Ok(Self::new(
            config.server.clone(),
            config.reconnect.clone(),
            Arc::new(connector),
        ))
    }

    /// Return the live connection, creating it on first use.
    ///
    /// A connection that is connected, connecting or reconnecting is returned as is.
    /// One that ended up `Failed` or `Disconnected` is retired and replaced by a
    /// fresh instance, which keeps dispatching to the handlers already registered.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<Connection> {
        let mut live = lock(&self.inner.live);

        if let Some(existing) = live.as_ref() {
            if existing.connection.state().is_live() {
                return Ok(existing.connection.clone());
            }
            debug!(
                connection_id = %existing.connection.id(),
                state = %existing.connection.state(),
                "retiring finished connection"
            );
            existing.request_shutdown();
        }

        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;

        let id = uuid::Uuid::new_v4().to_string();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ConnectionShared {
            id: id.clone(),
            state_tx,
            cmd_tx,
            closed: AtomicBool::new(false),
            stats: Mutex::new(ClientState::new(id.clone())),
        });

        let actor = ConnectionActor {
            shared: shared.clone(),
            handlers: self.inner.handlers.clone(),
            connector: self.inner.connector.clone(),
            transports: self.inner.server.transports.clone(),
            timeout: self.inner.server.timeout,
            policy: self.inner.policy.clone(),
            lifecycle_tx: self.inner.lifecycle_tx.clone(),
            cmd_rx,
            pending: VecDeque::new(),
        };
        let task = runtime.spawn(actor.run());

        info!(connection_id = %id, url = %self.inner.server.url, "Opening realtime connection");
        let connection = Connection { shared };
        *live = Some(Live {
            connection: connection.clone(),
            task,
        });
        Ok(connection)
    }

    /// Tear down the connection, cancelling any pending retry.
    ///
    /// Every registered handler is discarded and outstanding disposers become
    /// no-ops; a later `connect()` builds a fresh instance. No-op when nothing is
    /// connected.
    pub async fn disconnect(&self) {
        let live = lock(&self.inner.live).take();
        let Some(mut live) = live else {
            return;
        };

        info!(connection_id = %live.connection.id(), "Disconnecting realtime connection");
        live.request_shutdown();
        lock(&self.inner.handlers).clear();

        // the task gets one timeout to drain its link, plus the same again as slack
        if tokio::time::timeout(self.inner.server.timeout * 2, &mut live.task)
            .await
            .is_err()
        {
            warn!(
                connection_id = %live.connection.id(),
                "Connection task did not stop in time, aborting"
            );
            live.task.abort();
        }
        live.connection.shared.set_state(ConnectionState::Disconnected);
    }

    /// The current connection, if one has been created and not torn down.
    pub fn current(&self) -> Option<Connection> {
        lock(&self.inner.live)
            .as_ref()
            .map(|live| live.connection.clone())
    }

    /// The current connection if it is connected or still trying to be.
    ///
    /// Unlike [`connect`](Self::connect) this never replaces a finished connection.
    pub fn live(&self) -> Option<Connection> {
        self.current()
            .filter(|connection| connection.state().is_live())
    }

    pub fn state(&self) -> ConnectionState {
        self.current()
            .map(|connection| connection.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle_tx.subscribe()
    }

    pub fn server(&self) -> &ServerConfig {
        &self.inner.server
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    pub(crate) fn handlers(&self) -> &Arc<Mutex<HandlerTable>> {
        &self.inner.handlers
    }
}

enum Established {
    Ready {
        link: TransportLink,
        info: OpenInfo,
        socket_id: Option<String>,
    },
    Shutdown,
}

enum SessionEnd {
    Shutdown,
    /// Transport went away; eligible for reconnection.
    Lost(String),
    /// The server closed the namespace on purpose; no reconnection.
    Kicked(String),
}

struct ConnectionActor {
    shared: Arc<ConnectionShared>,
    handlers: Arc<Mutex<HandlerTable>>,
    connector: Arc<dyn Connector>,
    transports: Vec<TransportKind>,
    timeout: Duration,
    policy: ReconnectPolicy,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<(String, Value)>,
}

impl ConnectionActor {
    async fn run(mut self) {
        let id = self.shared.id.clone();
        let mut attempt: u32 = 0;
        let mut has_connected = false;

        self.shared.set_state(ConnectionState::Connecting);
        self.notify(LifecycleEvent::Connecting {
            connection_id: id.clone(),
        });

        loop {
            match self.establish().await {
                Ok(Established::Ready {
                    link,
                    info,
                    socket_id,
                }) => {
                    let transport = link.kind();
                    let reconnected = has_connected;
                    has_connected = true;
                    attempt = 0;

                    lock(&self.shared.stats).mark_connected(socket_id.clone(), transport);
                    self.shared.set_state(ConnectionState::Connected);
                    monitoring::CONNECTED_GAUGE.set(1.0);
                    info!(
                        connection_id = %id,
                        socket_id = socket_id.as_deref().unwrap_or("-"),
                        %transport,
                        reconnected,
                        "Realtime connection established"
                    );
                    self.notify(LifecycleEvent::Connected {
                        connection_id: id.clone(),
                        transport,
                        reconnected,
                    });
                    self.dispatch(
                        names::CONNECT,
                        &json!({ "connection_id": id, "transport": transport.query_name() }),
                    );

                    let end = self.run_session(link, info).await;
                    lock(&self.shared.stats).mark_disconnected();
                    monitoring::CONNECTED_GAUGE.set(0.0);

                    match end {
                        SessionEnd::Shutdown => {
                            self.finish("client disconnect");
                            return;
                        }
                        SessionEnd::Kicked(reason) => {
                            warn!(connection_id = %id, "Server closed the connection: {}", reason);
                            self.finish(&reason);
                            return;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(connection_id = %id, "Realtime connection lost: {}", reason);
                            self.notify(LifecycleEvent::Disconnected {
                                connection_id: id.clone(),
                                reason: reason.clone(),
                            });
                            self.dispatch(names::DISCONNECT, &json!({ "reason": reason }));
                        }
                    }
                }
                Ok(Established::Shutdown) => {
                    self.finish("client disconnect");
                    return;
                }
                Err(e) => {
                    warn!(connection_id = %id, attempt, "Connection attempt failed: {}", e);
                    self.notify(LifecycleEvent::Error {
                        connection_id: id.clone(),
                        message: e.to_string(),
                    });
                    self.dispatch(names::ERROR, &json!({ "message": e.to_string() }));
                    if !e.is_transport() {
                        error!(connection_id = %id, "Not retrying: {}", e);
                        self.shared.set_state(ConnectionState::Failed);
                        self.notify(LifecycleEvent::Failed {
                            connection_id: id.clone(),
                            attempts: attempt,
                        });
                        return;
                    }
                }
            }

            if !self.policy.enabled {
                self.shared.set_state(ConnectionState::Disconnected);
                info!(connection_id = %id, "Reconnection disabled, staying disconnected");
                return;
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                self.fail(attempt - 1);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            lock(&self.shared.stats).begin_reconnect(attempt);
            self.shared.set_state(ConnectionState::Reconnecting);
            monitoring::RECONNECT_COUNTER.increment(1);
            warn!(
                connection_id = %id,
                "Reconnecting in {} ms (attempt {}/{})",
                delay.as_millis(),
                attempt,
                self.policy.max_attempts
            );
            self.notify(LifecycleEvent::Reconnecting {
                connection_id: id.clone(),
                attempt,
                delay,
            });

            if !self.wait_before_retry(delay).await {
                self.finish("client disconnect");
                return;
            }
        }
    }

    /// Try each transport in preference order; the first to finish the handshake wins.
    async fn establish(&mut self) -> Result<Established> {
        let mut last_error = None;

        for kind in self.transports.clone() {
            let attempt = handshake(self.connector.clone(), kind, self.timeout);
            tokio::pin!(attempt);

            let outcome = loop {
                tokio::select! {
                    result = &mut attempt => break Some(result),
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(Command::Emit { name, payload }) => self.buffer(name, payload),
                        Some(Command::Shutdown) | None => break None,
                    },
                }
            };

            match outcome {
                None => return Ok(Established::Shutdown),
                Some(Ok((link, info, socket_id))) => {
                    return Ok(Established::Ready {
                        link,
                        info,
                        socket_id,
                    });
                }
                Some(Err(e)) => {
                    debug!(transport = %kind, "Transport unavailable: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| RealtimeError::Transport("no transports configured".to_string())))
    }

    async fn run_session(&mut self, mut link: TransportLink, info: OpenInfo) -> SessionEnd {
        while let Some((name, payload)) = self.pending.pop_front() {
            if let Err(e) = send_event(&link, &name, payload.clone()).await {
                self.pending.push_front((name, payload));
                return SessionEnd::Lost(format!("flush failed: {e}"));
            }
        }

        let heartbeat = info.heartbeat_deadline();
        let idle = sleep(heartbeat);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                packet = link.recv() => {
                    let Some(packet) = packet else {
                        return SessionEnd::Lost("transport closed".to_string());
                    };
                    idle.as_mut().reset(Instant::now() + heartbeat);
                    if let Some(end) = self.handle_packet(&link, packet).await {
                        return end;
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit { name, payload }) => {
                        if let Err(e) = send_event(&link, &name, payload.clone()).await {
                            self.buffer(name, payload);
                            return SessionEnd::Lost(format!("send failed: {e}"));
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = link
                            .send(EnginePacket::message(&SocketPacket::Disconnect))
                            .await;
                        let _ = link.send(EnginePacket::Close).await;
                        link.close(self.timeout).await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = &mut idle => {
                    return SessionEnd::Lost(format!("no heartbeat within {} ms", heartbeat.as_millis()));
                }
            }
        }
    }

    async fn handle_packet(&mut self, link: &TransportLink, packet: EnginePacket) -> Option<SessionEnd> {
        match packet {
            EnginePacket::Ping(data) => {
                trace!("Heartbeat ping");
                if link.send(EnginePacket::Pong(data)).await.is_err() {
                    return Some(SessionEnd::Lost("failed to answer heartbeat".to_string()));
                }
            }
            EnginePacket::Close => {
                return Some(SessionEnd::Lost("server closed the transport".to_string()));
            }
            EnginePacket::Message(raw) => {
                lock(&self.shared.stats).record_message();
                monitoring::MESSAGES_RECEIVED_COUNTER.increment(1);

                match SocketPacket::decode(&raw) {
                    Ok(SocketPacket::Event { name, payload }) => self.dispatch(&name, &payload),
                    Ok(SocketPacket::Disconnect) => {
                        return Some(SessionEnd::Kicked(
                            "server disconnected the namespace".to_string(),
                        ));
                    }
                    Ok(SocketPacket::ConnectError(data)) => {
                        return Some(SessionEnd::Lost(format!("namespace error: {data}")));
                    }
                    Ok(other) => trace!("Ignoring socket packet {:?}", other),
                    Err(e) => {
                        lock(&self.shared.stats).record_malformed();
                        warn!(
                            "Dropping undecodable packet: {}. Packet: {}",
                            e,
                            raw.chars().take(100).collect::<String>()
                        );
                    }
                }
            }
            other => trace!("Ignoring engine packet {:?}", other),
        }
        None
    }

    /// Invoke every handler registered for `name`, in registration order.
    ///
    /// The handler list is snapshotted first so handlers may register or dispose
    /// subscriptions without deadlocking.
    fn dispatch(&self, name: &str, payload: &Value) {
        let handlers = lock(&self.handlers).handlers_for(name);
        if handlers.is_empty() {
            trace!(event = name, "No handlers registered");
            return;
        }

        for handler in &handlers {
            handler(payload);
        }
        lock(&self.shared.stats).record_dispatch(handlers.len());
        monitoring::EVENTS_DISPATCHED_COUNTER.increment(handlers.len() as u64);
    }

    fn buffer(&mut self, name: String, payload: Value) {
        if self.pending.len() >= PENDING_BUFFER_CAPACITY {
            if let Some((dropped, _)) = self.pending.pop_front() {
                warn!(event = %dropped, "Send buffer full, dropping oldest message");
            }
        }
        self.pending.push_back((name, payload));
    }

    /// Sleep out the retry delay while still accepting sends. Returns false on shutdown.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        let wait = sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit { name, payload }) => self.buffer(name, payload),
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    fn finish(&self, reason: &str) {
        let was_connected = self.shared.state_tx.borrow().is_live();
        self.shared.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.notify(LifecycleEvent::Disconnected {
                connection_id: self.shared.id.clone(),
                reason: reason.to_string(),
            });
        }
        info!(connection_id = %self.shared.id, "Connection task stopped: {}", reason);
    }

    fn fail(&self, attempts: u32) {
        let err = RealtimeError::ReconnectionExhausted { attempts };
        error!(connection_id = %self.shared.id, "{}", err);
        self.shared.set_state(ConnectionState::Failed);
        self.notify(LifecycleEvent::Failed {
            connection_id: self.shared.id.clone(),
            attempts,
        });
        self.dispatch(names::ERROR, &json!({ "message": err.to_string() }));
    }

    fn notify(&self, event: LifecycleEvent) {
        // No subscribers is fine; lifecycle observers are optional.
        let _ = self.lifecycle_tx.send(event);
    }
}

async fn send_event(link: &TransportLink, name: &str, payload: Value) -> Result<()> {
    trace!(event = name, "Sending event");
    link.send(EnginePacket::message(&SocketPacket::event(name, payload)))
        .await
}

async fn handshake(
    connector: Arc<dyn Connector>,
    kind: TransportKind,
    deadline: Duration,
) -> Result<(TransportLink, OpenInfo, Option<String>)> {
    tokio::time::timeout(deadline, open_namespace(connector, kind))
        .await
        .map_err(|_| RealtimeError::Timeout)?
}

/// Open a link, wait for the Engine.IO open packet, then connect the default namespace.
async fn open_namespace(
    connector: Arc<dyn Connector>,
    kind: TransportKind,
) -> Result<(TransportLink, OpenInfo, Option<String>)> {
    let mut link = connector.open(kind).await?;

    let info = match link.recv().await {
        Some(EnginePacket::Open(info)) => info,
        Some(other) => {
            return Err(RealtimeError::Handshake(format!(
                "expected open packet, got {other:?}"
            )));
        }
        None => return Err(RealtimeError::ConnectionClosed),
    };
    debug!(transport = %kind, sid = %info.sid, "Engine.IO session opened");

    link.send(EnginePacket::message(&SocketPacket::Connect(None)))
        .await?;

    loop {
        match link.recv().await {
            Some(EnginePacket::Message(raw)) => match SocketPacket::decode(&raw)? {
                SocketPacket::Connect(data) => {
                    let socket_id = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Ok((link, info, socket_id));
                }
                SocketPacket::ConnectError(data) => {
                    return Err(RealtimeError::Handshake(format!(
                        "server rejected namespace connect: {data}"
                    )));
                }
                other => debug!("Ignoring packet before namespace connect: {:?}", other),
            },
            Some(EnginePacket::Ping(data)) => link.send(EnginePacket::Pong(data)).await?,
            Some(EnginePacket::Close) | None => return Err(RealtimeError::ConnectionClosed),
            Some(other) => trace!("Ignoring engine packet during handshake: {:?}", other),
        }
    }
}
