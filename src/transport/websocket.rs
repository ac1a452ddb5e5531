// file: src/transport/websocket.rs
// description: Framed Engine.IO transport over a WebSocket connection

use super::{LINK_CHANNEL_CAPACITY, TransportKind, TransportLink};
use crate::{
    error::{RealtimeError, Result},
    protocol::EnginePacket,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

pub async fn open(url: &Url, timeout: Duration) -> Result<TransportLink> {
    let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| RealtimeError::Timeout)??;

    info!("WebSocket connection established to {}", url);

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<EnginePacket>(LINK_CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<EnginePacket>(LINK_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            let closing = matches!(packet, EnginePacket::Close);
            let encoded = packet.encode();
            trace!("ws send: {}", encoded);

            if let Err(e) = write.send(Message::Text(encoded.into())).await {
                warn!("WebSocket write failed: {}", e);
                return;
            }
            if closing {
                break;
            }
        }
        // queue drained or link closed locally
        if let Err(e) = write.close().await {
            debug!("WebSocket close handshake failed: {}", e);
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    trace!("ws recv: {}", text.as_str());
                    match EnginePacket::decode(text.as_str()) {
                        Ok(packet) => {
                            if in_tx.send(packet).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable frame: {}", e),
                    }
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring binary frame of {} bytes", data.len());
                }
                Ok(Message::Close(frame)) => {
                    debug!("Received close frame: {:?}", frame);
                    break;
                }
                // Ping/pong frames are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket stream error: {}", e);
                    break;
                }
            }
        }
        debug!("WebSocket reader finished");
    });

    Ok(TransportLink::new(TransportKind::WebSocket, out_tx, in_rx)
        .with_writer(writer)
        .with_task(reader))
}
