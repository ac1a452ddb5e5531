use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "eeg-realtime",
    about = "realtime client for the eeg platform: job progress, recording updates and live band power",
    version
)]
pub struct Args {
    /// Realtime server URL (http, https, ws or wss)
    #[arg(short, long, env = "EEG_REALTIME_URL", default_value = "http://localhost:5000")]
    pub url: String,

    /// Transport preference order, comma separated (websocket, polling)
    #[arg(long, value_delimiter = ',', default_value = "websocket,polling")]
    pub transports: Vec<String>,

    /// Recording to join for live features and predictions
    #[arg(short, long)]
    pub recording: Option<String>,

    /// Job ids to follow (repeatable or comma separated)
    #[arg(short, long = "job", value_delimiter = ',')]
    pub jobs: Vec<String>,

    /// Model id used for periodic inference requests
    #[arg(long)]
    pub model: Option<String>,

    /// Seconds between inference requests (requires --recording and --model)
    #[arg(long, default_value = "0")]
    pub inference_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Handshake timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Disable automatic reconnection
    #[arg(long)]
    pub no_reconnect: bool,

    /// Base reconnection delay in milliseconds
    #[arg(long, default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts
    #[arg(long, default_value = "5")]
    pub max_reconnects: u32,

    /// Reconnection backoff: fixed or exponential
    #[arg(long, default_value = "fixed")]
    pub backoff: String,

    /// Upper bound for exponential backoff in milliseconds
    #[arg(long, default_value = "5000")]
    pub max_reconnect_delay_ms: u64,

    /// Channel rejoin policy after a reconnect: manual or auto
    #[arg(long, default_value = "manual")]
    pub rejoin: String,

    /// Live sample rate in Hz
    #[arg(long, default_value = "10")]
    pub rate: u32,

    /// Sliding window capacity (50, 100, 200 or 500)
    #[arg(long, default_value = "100")]
    pub capacity: usize,

    /// Channel labels for the live feed, comma separated
    #[arg(long, value_delimiter = ',', default_value = "Fp1,Fp2,F3,F4,C3,C4,O1,O2")]
    pub channels: Vec<String>,

    /// Forward generated samples to the server as stream_data chunks
    #[arg(long)]
    pub upload: bool,

    /// Samples per uploaded chunk
    #[arg(long, default_value = "50")]
    pub chunk_size: usize,

    /// Stop after this many seconds (0 runs until Ctrl+C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Output format: table, json, minimal
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Disable colored output (useful for piping to files)
    #[arg(long)]
    pub no_color: bool,

    /// Quiet mode - only errors and band output
    #[arg(long)]
    pub quiet: bool,
}
