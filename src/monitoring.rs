use crate::{client_state::ClientState, error::RealtimeError};
use anyhow::Result;
use metrics::{Counter, Gauge, counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static MESSAGES_RECEIVED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_messages_received_total"));
pub static EVENTS_DISPATCHED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_events_dispatched_total"));
pub static MALFORMED_PAYLOAD_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_malformed_payloads_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_reconnects_total"));
pub static CONNECTED_GAUGE: LazyLock<Gauge> = LazyLock::new(|| gauge!("eeg_realtime_connected"));
pub static SAMPLES_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_samples_total"));
pub static BAND_RECOMPUTE_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_band_recomputations_total"));
pub static CHUNKS_UPLOADED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("eeg_realtime_chunks_uploaded_total"));

pub async fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "eeg-realtime")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(_handle) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            MESSAGES_RECEIVED_COUNTER.absolute(0);
            EVENTS_DISPATCHED_COUNTER.absolute(0);
            MALFORMED_PAYLOAD_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            SAMPLES_COUNTER.absolute(0);
            BAND_RECOMPUTE_COUNTER.absolute(0);
            CHUNKS_UPLOADED_COUNTER.absolute(0);
            CONNECTED_GAUGE.set(0.0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(RealtimeError::MetricsError(e.to_string()).into())
        }
    }
}

#[derive(Debug)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub connection_state: String,
    pub last_message_time: Option<chrono::DateTime<chrono::Utc>>,
    pub total_messages: u64,
    pub total_dispatched: u64,
    pub malformed_packets: u64,
    pub reconnect_count: u64,
    pub samples: u64,
    pub uptime: chrono::Duration,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            is_healthy: false,
            connection_state: "disconnected".to_string(),
            last_message_time: None,
            total_messages: 0,
            total_dispatched: 0,
            malformed_packets: 0,
            reconnect_count: 0,
            samples: 0,
            uptime: chrono::Duration::zero(),
        }
    }

    /// Build a report from a connection's counters. Instants are mapped onto wall-clock time.
    pub fn from_client(state: &ClientState, connection_state: &str, samples: u64) -> Self {
        let now = tokio::time::Instant::now();
        let wall_now = chrono::Utc::now();
        let last_message_time = state.last_message_time.and_then(|at| {
            chrono::Duration::from_std(now.saturating_duration_since(at))
                .ok()
                .map(|age| wall_now - age)
        });

        Self {
            is_healthy: state.connected_since.is_some(),
            connection_state: connection_state.to_string(),
            last_message_time,
            total_messages: state.messages_received,
            total_dispatched: state.events_dispatched,
            malformed_packets: state.malformed_packets,
            reconnect_count: state.total_reconnects,
            samples,
            uptime: chrono::Duration::from_std(now.saturating_duration_since(state.created_at))
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": if self.is_healthy { "healthy" } else { "unhealthy" },
            "connection_state": self.connection_state,
            "last_message_time": self.last_message_time,
            "total_messages": self.total_messages,
            "total_dispatched": self.total_dispatched,
            "malformed_packets": self.malformed_packets,
            "reconnect_count": self.reconnect_count,
            "samples": self.samples,
            "uptime_seconds": self.uptime.num_seconds(),
            "timestamp": chrono::Utc::now()
        })
    }
}
