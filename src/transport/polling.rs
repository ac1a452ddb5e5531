// file: src/transport/polling.rs
// description: Engine.IO HTTP long-polling transport, used when WebSocket is unavailable

use super::{LINK_CHANNEL_CAPACITY, TransportKind, TransportLink};
use crate::{
    error::{RealtimeError, Result},
    protocol::{EnginePacket, decode_payload, encode_payload},
};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

async fn poll(http: &reqwest::Client, url: &Url) -> Result<String> {
    let body = http
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body)
}

async fn push(http: &reqwest::Client, url: &Url, body: String) -> Result<()> {
    http.post(url.clone())
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

pub async fn open(http: &reqwest::Client, url: Url, timeout: Duration) -> Result<TransportLink> {
    let body = tokio::time::timeout(timeout, poll(http, &url))
        .await
        .map_err(|_| RealtimeError::Timeout)??;
    let packets = decode_payload(&body)?;

    let sid = match packets.first() {
        Some(EnginePacket::Open(info)) => info.sid.clone(),
        Some(other) => {
            return Err(RealtimeError::Handshake(format!(
                "polling handshake started with {other:?}"
            )));
        }
        None => {
            return Err(RealtimeError::Handshake(
                "empty polling handshake response".to_string(),
            ));
        }
    };

    let mut session_url = url.clone();
    session_url.query_pairs_mut().append_pair("sid", &sid);
    info!("Polling session {} opened at {}", sid, url);

    let (out_tx, mut out_rx) = mpsc::channel::<EnginePacket>(LINK_CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<EnginePacket>(LINK_CHANNEL_CAPACITY);

    // The open packet (and anything batched with it) goes through the same path
    // as every later packet, so the connection sees one uniform stream.
    for packet in packets {
        in_tx
            .send(packet)
            .await
            .map_err(|_| RealtimeError::ConnectionClosed)?;
    }

    let reader = {
        let http = http.clone();
        let url = session_url.clone();
        tokio::spawn(async move {
            loop {
                let body = match poll(&http, &url).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Long-poll request failed: {}", e);
                        break;
                    }
                };
                trace!("poll recv: {}", body);

                let packets = match decode_payload(&body) {
                    Ok(packets) => packets,
                    Err(e) => {
                        warn!("Dropping undecodable poll payload: {}", e);
                        continue;
                    }
                };
                for packet in packets {
                    let closing = matches!(packet, EnginePacket::Close);
                    if in_tx.send(packet).await.is_err() || closing {
                        return;
                    }
                }
            }
            debug!("Polling reader finished");
        })
    };

    let writer = {
        let http = http.clone();
        let url = session_url;
        tokio::spawn(async move {
            while let Some(first) = out_rx.recv().await {
                let mut batch = vec![first];
                while let Ok(next) = out_rx.try_recv() {
                    batch.push(next);
                }
                let closing = batch.iter().any(|p| matches!(p, EnginePacket::Close));

                if let Err(e) = push(&http, &url, encode_payload(&batch)).await {
                    warn!("Polling POST failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        })
    };

    Ok(TransportLink::new(TransportKind::Polling, out_tx, in_rx)
        .with_writer(writer)
        .with_task(reader))
}
