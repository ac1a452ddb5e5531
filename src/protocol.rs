/// file: src/protocol.rs
/// description: Engine.IO v4 / Socket.IO v5 packet codec and typed realtime payloads
/// reference: https://socket.io/docs/v4/socket-io-protocol/
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

pub const ENGINE_IO_VERSION: &str = "4";
pub const SOCKET_IO_PATH: &str = "/socket.io/";
/// Separates packets inside a single polling payload.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// Event names carried over the socket.
pub mod names {
    pub const JOIN_RECORDING: &str = "join_recording";
    pub const LEAVE_RECORDING: &str = "leave_recording";
    pub const SUBSCRIBE_JOB: &str = "subscribe_job";
    pub const UNSUBSCRIBE_JOB: &str = "unsubscribe_job";
    pub const STREAM_DATA: &str = "stream_data";
    pub const REQUEST_INFERENCE: &str = "request_inference";

    pub const REALTIME_FEATURES: &str = "realtime_features";
    pub const REALTIME_PREDICTION: &str = "realtime_prediction";
    pub const JOB_PROGRESS: &str = "job_progress";
    pub const RECORDING_UPDATE: &str = "recording_update";

    // Reserved lifecycle names, dispatched locally by the connection.
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const ERROR: &str = "error";
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

/// Handshake data sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            upgrades: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL_MS,
            ping_timeout: DEFAULT_PING_TIMEOUT_MS,
            max_payload: None,
        }
    }

    /// How long the link may stay silent before it is considered dead.
    pub fn heartbeat_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn message(packet: &SocketPacket) -> Self {
        EnginePacket::Message(packet.encode())
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => {
                format!("0{}", serde_json::to_string(info).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RealtimeError::Protocol("empty engine packet".to_string()))?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(rest.to_string())),
            '3' => Ok(EnginePacket::Pong(rest.to_string())),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(RealtimeError::Protocol(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }
}

/// Split a long-polling response body into its packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>> {
    body.split(RECORD_SEPARATOR)
        .filter(|chunk| !chunk.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    Ack,
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            name: name.into(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(data)) => format!("0{data}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, payload } => format!("2{}", json!([name, payload])),
            SocketPacket::Ack => "3[]".to_string(),
            SocketPacket::ConnectError(data) => format!("4{data}"),
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RealtimeError::Protocol("empty socket packet".to_string()))?;
        let body = strip_namespace(chars.as_str());

        match kind {
            '0' if body.is_empty() => Ok(SocketPacket::Connect(None)),
            '0' => Ok(SocketPacket::Connect(Some(serde_json::from_str(body)?))),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => decode_event(strip_ack_id(body)),
            '3' => Ok(SocketPacket::Ack),
            '4' if body.is_empty() => Ok(SocketPacket::ConnectError(Value::Null)),
            '4' => Ok(SocketPacket::ConnectError(serde_json::from_str(body)?)),
            other => Err(RealtimeError::Protocol(format!(
                "unsupported socket packet type '{other}'"
            ))),
        }
    }
}

// "/admin,2[...]" -> "2[...]"; the default namespace carries no prefix.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(body: &str) -> Result<SocketPacket> {
    let mut args = match serde_json::from_str::<Value>(body)? {
        Value::Array(args) => args,
        other => {
            return Err(RealtimeError::Protocol(format!(
                "event packet is not an array: {other}"
            )));
        }
    };
    if args.is_empty() {
        return Err(RealtimeError::Protocol("event packet without a name".to_string()));
    }

    let name = match args.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(RealtimeError::Protocol(format!(
                "event name is not a string: {other}"
            )));
        }
    };
    let payload = match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    };

    Ok(SocketPacket::Event { name, payload })
}

/// Client → server messages with a fixed payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    JoinRecording {
        recording_id: String,
    },
    LeaveRecording {
        recording_id: String,
    },
    SubscribeJob {
        job_id: String,
    },
    UnsubscribeJob {
        job_id: String,
    },
    StreamData {
        recording_id: String,
        chunk: Vec<Vec<f64>>,
        sfreq: u32,
    },
    RequestInference {
        recording_id: String,
        model_id: String,
    },
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::JoinRecording { .. } => names::JOIN_RECORDING,
            OutboundMessage::LeaveRecording { .. } => names::LEAVE_RECORDING,
            OutboundMessage::SubscribeJob { .. } => names::SUBSCRIBE_JOB,
            OutboundMessage::UnsubscribeJob { .. } => names::UNSUBSCRIBE_JOB,
            OutboundMessage::StreamData { .. } => names::STREAM_DATA,
            OutboundMessage::RequestInference { .. } => names::REQUEST_INFERENCE,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundMessage::JoinRecording { recording_id }
            | OutboundMessage::LeaveRecording { recording_id } => {
                json!({ "recording_id": recording_id })
            }
            OutboundMessage::SubscribeJob { job_id } | OutboundMessage::UnsubscribeJob { job_id } => {
                json!({ "job_id": job_id })
            }
            OutboundMessage::StreamData {
                recording_id,
                chunk,
                sfreq,
            } => json!({ "recording_id": recording_id, "chunk": chunk, "sfreq": sfreq }),
            OutboundMessage::RequestInference {
                recording_id,
                model_id,
            } => json!({ "recording_id": recording_id, "model_id": model_id }),
        }
    }
}

// Server → client payloads

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub progress: f64,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
}

impl JobProgress {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("completed") | Some("failed") | Some("cancelled")
        ) || self.progress >= 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingUpdate {
    pub recording_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeFeatures {
    pub recording_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub features: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimePrediction {
    pub recording_id: String,
    pub prediction: i64,
    pub probability: f64,
    #[serde(default)]
    pub probabilities: Vec<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_packet_with_defaults() {
        let packet = EnginePacket::decode(r#"0{"sid":"abc","upgrades":["websocket"]}"#).unwrap();
        match packet {
            EnginePacket::Open(info) => {
                assert_eq!(info.sid, "abc");
                assert_eq!(info.upgrades, vec!["websocket".to_string()]);
                assert_eq!(info.ping_interval, 25_000);
                assert_eq!(info.ping_timeout, 20_000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_engine_type() {
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("").is_err());
    }

    #[test]
    fn polling_payload_splits_on_record_separator() {
        let body = "2\u{1e}42[\"job_progress\",{\"job_id\":\"j1\",\"progress\":40}]\u{1e}6";
        let packets = decode_payload(body).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], EnginePacket::Ping(String::new()));
        assert_eq!(packets[2], EnginePacket::Noop);
        assert_eq!(
            encode_payload(&[EnginePacket::Pong(String::new()), EnginePacket::Noop]),
            "3\u{1e}6"
        );
    }

    #[test]
    fn event_packet_wire_format() {
        let packet = SocketPacket::event("join_recording", json!({ "recording_id": "R1" }));
        assert_eq!(
            EnginePacket::message(&packet).encode(),
            r#"42["join_recording",{"recording_id":"R1"}]"#
        );
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/live,17["recording_update",{"recording_id":"R9"}]"#)
            .unwrap();
        assert_eq!(
            packet,
            SocketPacket::event("recording_update", json!({ "recording_id": "R9" }))
        );
    }

    #[test]
    fn event_without_payload_is_null_and_extra_args_are_grouped() {
        assert_eq!(
            SocketPacket::decode(r#"2["ping_me"]"#).unwrap(),
            SocketPacket::event("ping_me", Value::Null)
        );
        assert_eq!(
            SocketPacket::decode(r#"2["multi",1,2]"#).unwrap(),
            SocketPacket::event("multi", json!([1, 2]))
        );
    }

    #[test]
    fn malformed_event_packets_are_protocol_errors() {
        assert!(SocketPacket::decode(r#"2{"not":"array"}"#).is_err());
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[42]").is_err());
    }

    #[test]
    fn connect_reply_carries_sid() {
        let packet = SocketPacket::decode(r#"0{"sid":"s-1"}"#).unwrap();
        assert_eq!(packet, SocketPacket::Connect(Some(json!({ "sid": "s-1" }))));
        assert_eq!(SocketPacket::Connect(None).encode(), "0");
    }

    #[test]
    fn outbound_payload_shapes() {
        let msg = OutboundMessage::StreamData {
            recording_id: "R1".to_string(),
            chunk: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            sfreq: 250,
        };
        assert_eq!(msg.event_name(), "stream_data");
        assert_eq!(
            msg.payload(),
            json!({ "recording_id": "R1", "chunk": [[1.0, 2.0], [3.0, 4.0]], "sfreq": 250 })
        );

        let msg = OutboundMessage::UnsubscribeJob {
            job_id: "J7".to_string(),
        };
        assert_eq!(msg.event_name(), "unsubscribe_job");
        assert_eq!(msg.payload(), json!({ "job_id": "J7" }));
    }

    #[test]
    fn job_progress_accepts_server_shape() {
        let progress: JobProgress = serde_json::from_value(json!({
            "job_id": "J1",
            "progress": 100.0,
            "status": "completed",
            "log": null
        }))
        .unwrap();
        assert!(progress.is_finished());
        assert_eq!(progress.step, None);
    }
}
