//! In-process transport.
//!
//! [`MemoryConnector`] hands out links backed by channels; each opened link shows up
//! on the paired [`MemoryServer`] as a [`MemoryPeer`], which plays the server side of
//! the Socket.IO handshake and can push events, ping, or drop the link at will.

use super::{Connector, LINK_CHANNEL_CAPACITY, TransportKind, TransportLink};
use crate::{
    error::{RealtimeError, Result},
    protocol::{EnginePacket, OpenInfo, SocketPacket},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::sync::mpsc;

pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse_next: AtomicU32,
    refused_kinds: Mutex<HashSet<TransportKind>>,
    opens: AtomicU32,
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

pub fn memory_pair() -> (Arc<MemoryConnector>, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        accept_tx,
        refuse_next: AtomicU32::new(0),
        refused_kinds: Mutex::new(HashSet::new()),
        opens: AtomicU32::new(0),
    };
    (Arc::new(connector), MemoryServer { accept_rx })
}

impl MemoryConnector {
    /// Fail the next `count` open calls, whatever their kind.
    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Fail every open of `kind` from now on.
    pub fn refuse_kind(&self, kind: TransportKind) {
        self.refused_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, kind: TransportKind) -> Result<TransportLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let kind_refused = self
            .refused_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind);
        if kind_refused {
            return Err(RealtimeError::Transport(format!(
                "memory transport refused {kind}"
            )));
        }

        let refuse = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(RealtimeError::Transport(
                "memory transport refused connection".to_string(),
            ));
        }

        let (client_tx, server_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (server_tx, client_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);

        self.accept_tx
            .send(MemoryPeer {
                kind,
                to_client: server_tx,
                from_client: server_rx,
            })
            .map_err(|_| RealtimeError::Transport("memory server is gone".to_string()))?;

        Ok(TransportLink::new(kind, client_tx, client_rx))
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Accept the next link and complete the handshake on it.
    pub async fn accept_connected(&mut self, sid: &str) -> Option<MemoryPeer> {
        let mut peer = self.accept().await?;
        peer.handshake(sid).await?;
        Some(peer)
    }
}

/// Server end of one memory link. Dropping it closes the link.
pub struct MemoryPeer {
    kind: TransportKind,
    to_client: mpsc::Sender<EnginePacket>,
    from_client: mpsc::Receiver<EnginePacket>,
}

impl MemoryPeer {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn handshake(&mut self, sid: &str) -> Option<()> {
        self.handshake_with(OpenInfo::new(sid)).await
    }

    pub async fn handshake_with(&mut self, info: OpenInfo) -> Option<()> {
        let sid = info.sid.clone();
        self.send(EnginePacket::Open(info)).await?;
        loop {
            if let EnginePacket::Message(raw) = self.recv().await?
                && let Ok(SocketPacket::Connect(_)) = SocketPacket::decode(&raw)
            {
                break;
            }
        }
        self.send(EnginePacket::message(&SocketPacket::Connect(Some(
            json!({ "sid": sid }),
        ))))
        .await
    }

    pub async fn send(&self, packet: EnginePacket) -> Option<()> {
        self.to_client.send(packet).await.ok()
    }

    pub async fn recv(&mut self) -> Option<EnginePacket> {
        self.from_client.recv().await
    }

    pub async fn emit(&self, name: &str, payload: Value) -> Option<()> {
        self.send(EnginePacket::message(&SocketPacket::event(name, payload)))
            .await
    }

    /// Next client event, skipping heartbeats and other control packets.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        loop {
            if let EnginePacket::Message(raw) = self.recv().await?
                && let Ok(SocketPacket::Event { name, payload }) = SocketPacket::decode(&raw)
            {
                return Some((name, payload));
            }
        }
    }

    /// Events already queued by the client, without waiting for more.
    pub fn drain_events(&mut self) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Ok(packet) = self.from_client.try_recv() {
            if let EnginePacket::Message(raw) = packet
                && let Ok(SocketPacket::Event { name, payload }) = SocketPacket::decode(&raw)
            {
                events.push((name, payload));
            }
        }
        events
    }
}
