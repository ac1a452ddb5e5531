use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP polling error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Maximum reconnection attempts ({attempts}) exhausted")]
    ReconnectionExhausted { attempts: u32 },

    #[error("Malformed payload for event '{event}': {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available to schedule work")]
    NoRuntime,

    #[error("Metrics server error: {0}")]
    MetricsError(String),
}

impl RealtimeError {
    /// Whether the error came from the transport or the handshake on it. Anything
    /// else, such as a bad endpoint URL, fails the same way on every retry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RealtimeError::Transport(_)
                | RealtimeError::WebSocket(_)
                | RealtimeError::Http(_)
                | RealtimeError::Io(_)
                | RealtimeError::Timeout
                | RealtimeError::ConnectionClosed
                | RealtimeError::Handshake(_)
                | RealtimeError::Protocol(_)
                | RealtimeError::Serde(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
