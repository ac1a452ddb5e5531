// file: src/transport/mod.rs
// description: Transport links carrying Engine.IO packets, and the connectors that open them
// reference: https://socket.io/docs/v4/engine-io-protocol/

use crate::{
    error::{RealtimeError, Result},
    protocol::{ENGINE_IO_VERSION, EnginePacket, SOCKET_IO_PATH},
};
use async_trait::async_trait;
use std::{fmt, str::FromStr, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;
use url::Url;

/// In-process connector for driving the client without sockets.
pub mod memory;
/// HTTP long-polling transport.
pub mod polling;
/// Framed WebSocket transport.
pub mod websocket;

pub(crate) const LINK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

impl TransportKind {
    pub fn query_name(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_name())
    }
}

impl FromStr for TransportKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "polling" | "long-polling" => Ok(TransportKind::Polling),
            other => Err(RealtimeError::InvalidConfig(format!(
                "unknown transport '{other}' (expected websocket or polling)"
            ))),
        }
    }
}

/// One open transport: a packet sink, a packet source, and the pump tasks behind them.
///
/// The inbound side yields `None` once the underlying transport is gone. Dropping
/// the link aborts its pump tasks; [`TransportLink::close`] lets the writer drain first.
pub struct TransportLink {
    kind: TransportKind,
    outbound: Option<mpsc::Sender<EnginePacket>>,
    inbound: mpsc::Receiver<EnginePacket>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        kind: TransportKind,
        outbound: mpsc::Sender<EnginePacket>,
        inbound: mpsc::Receiver<EnginePacket>,
    ) -> Self {
        Self {
            kind,
            outbound: Some(outbound),
            inbound,
            writer: None,
            tasks: Vec::new(),
        }
    }

    /// The task that drains `outbound` into the transport.
    pub fn with_writer(mut self, writer: JoinHandle<()>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn send(&self, packet: EnginePacket) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(RealtimeError::ConnectionClosed)?;
        outbound
            .send(packet)
            .await
            .map_err(|_| RealtimeError::ConnectionClosed)
    }

    /// Cancel-safe: no packet is lost if the future is dropped before completion.
    pub async fn recv(&mut self) -> Option<EnginePacket> {
        self.inbound.recv().await
    }

    /// Stop accepting packets and wait up to `grace` for the writer to flush what
    /// is already queued. Whatever is still unsent after that is dropped.
    pub async fn close(mut self, grace: Duration) {
        self.outbound = None;
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if tokio::time::timeout(grace, &mut writer).await.is_err() {
            warn!(transport = %self.kind, "Writer did not drain within {} ms, aborting", grace.as_millis());
            writer.abort();
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens transport links of a given kind.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, kind: TransportKind) -> Result<TransportLink>;
}

/// Build the Engine.IO endpoint for `base` and `kind`.
///
/// A bare host URL gets the default `/socket.io/` path; `http(s)` maps to `ws(s)`
/// for the framed transport and back for polling.
pub fn endpoint(base: &Url, kind: TransportKind) -> Result<Url> {
    let mut url = base.clone();

    let scheme = match (kind, base.scheme()) {
        (TransportKind::WebSocket, "http") | (TransportKind::WebSocket, "ws") => "ws",
        (TransportKind::WebSocket, "https") | (TransportKind::WebSocket, "wss") => "wss",
        (TransportKind::Polling, "http") | (TransportKind::Polling, "ws") => "http",
        (TransportKind::Polling, "https") | (TransportKind::Polling, "wss") => "https",
        (_, other) => {
            return Err(RealtimeError::InvalidConfig(format!(
                "unsupported URL scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        RealtimeError::InvalidConfig(format!("cannot use scheme '{scheme}' for {base}"))
    })?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(SOCKET_IO_PATH);
    }
    url.query_pairs_mut()
        .append_pair("EIO", ENGINE_IO_VERSION)
        .append_pair("transport", kind.query_name());

    Ok(url)
}

/// Connector for real servers: WebSocket via tokio-tungstenite, polling via reqwest.
pub struct NetworkConnector {
    base_url: Url,
    timeout: Duration,
    http: reqwest::Client,
}

impl NetworkConnector {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn open(&self, kind: TransportKind) -> Result<TransportLink> {
        let url = endpoint(&self.base_url, kind)?;
        match kind {
            TransportKind::WebSocket => websocket::open(&url, self.timeout).await,
            TransportKind::Polling => polling::open(&self.http, url, self.timeout).await,
        }
    }
}
