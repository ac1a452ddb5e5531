/// file: src/config.rs
/// description: Configuration management and CLI argument parsing for connection, reconnection and live stream settings
use crate::{
    channels::RejoinPolicy,
    cli::Args,
    error::{RealtimeError, Result},
    formatter::OutputFormat,
    transport::TransportKind,
};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Window capacities offered to users.
pub const CAPACITY_PRESETS: [usize; 4] = [50, 100, 200, 500];
pub const MAX_RATE_HZ: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub reconnect: ReconnectPolicy,
    pub stream: StreamConfig,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: Url,
    pub timeout: Duration,
    pub transports: Vec<TransportKind>,
}

impl ServerConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: Duration::from_secs(10),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (1-based). Never below `base_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { max_delay } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay
                    .saturating_mul(factor)
                    .min(max_delay.max(self.base_delay))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.max_attempts == 0 {
            return Err(RealtimeError::InvalidConfig(
                "max reconnection attempts must be at least 1 when reconnection is enabled"
                    .to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "reconnection delay must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub rate_hz: u32,
    pub capacity: usize,
    pub channel_labels: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10,
            capacity: 100,
            channel_labels: ["Fp1", "Fp2", "F3", "F4", "C3", "C4", "O1", "O2"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

impl StreamConfig {
    pub fn new(rate_hz: u32, capacity: usize, channel_labels: Vec<String>) -> Self {
        Self {
            rate_hz,
            capacity,
            channel_labels,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_hz == 0 || self.rate_hz > MAX_RATE_HZ {
            return Err(RealtimeError::InvalidConfig(format!(
                "sample rate must be within 1..={MAX_RATE_HZ} Hz, got {}",
                self.rate_hz
            )));
        }
        if !CAPACITY_PRESETS.contains(&self.capacity) {
            return Err(RealtimeError::InvalidConfig(format!(
                "window capacity must be one of {CAPACITY_PRESETS:?}, got {}",
                self.capacity
            )));
        }
        if self.channel_labels.is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "at least one channel label is required".to_string(),
            ));
        }
        let unique: HashSet<&String> = self.channel_labels.iter().collect();
        if unique.len() != self.channel_labels.len() {
            return Err(RealtimeError::InvalidConfig(
                "channel labels must be unique".to_string(),
            ));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.rate_hz.max(1)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub recording_id: Option<String>,
    pub job_ids: Vec<String>,
    pub model_id: Option<String>,
    pub upload_chunks: bool,
    pub chunk_size: usize,
    pub inference_interval: Option<Duration>,
    pub duration: Option<Duration>,
    pub rejoin: RejoinPolicy,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
    pub quiet: bool,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let url = Url::parse(&args.url)?;

        let transports = args
            .transports
            .iter()
            .map(|name| name.parse::<TransportKind>())
            .collect::<Result<Vec<_>>>()?;
        if transports.is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "at least one transport is required".to_string(),
            ));
        }

        let backoff = match args.backoff.to_lowercase().as_str() {
            "fixed" => Backoff::Fixed,
            "exponential" | "exp" => Backoff::Exponential {
                max_delay: Duration::from_millis(args.max_reconnect_delay_ms),
            },
            other => {
                return Err(RealtimeError::InvalidConfig(format!(
                    "unknown backoff '{other}' (expected fixed or exponential)"
                )));
            }
        };
        let reconnect = ReconnectPolicy {
            enabled: !args.no_reconnect,
            max_attempts: args.max_reconnects,
            base_delay: Duration::from_millis(args.reconnect_delay_ms),
            backoff,
        };
        reconnect.validate()?;

        let stream = StreamConfig::new(
            args.rate,
            args.capacity,
            args.channels
                .iter()
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty())
                .collect(),
        );
        stream.validate()?;

        if args.upload && args.recording.is_none() {
            return Err(RealtimeError::InvalidConfig(
                "--upload requires --recording".to_string(),
            ));
        }
        if args.upload && args.chunk_size == 0 {
            return Err(RealtimeError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if args.upload && args.chunk_size > args.capacity {
            return Err(RealtimeError::InvalidConfig(format!(
                "chunk size {} does not fit in a window of {} samples",
                args.chunk_size, args.capacity
            )));
        }
        let inference_interval = match (args.inference_interval, &args.recording, &args.model) {
            (0, _, _) => None,
            (secs, Some(_), Some(_)) => Some(Duration::from_secs(secs)),
            _ => {
                return Err(RealtimeError::InvalidConfig(
                    "--inference-interval requires --recording and --model".to_string(),
                ));
            }
        };

        Ok(Config {
            server: ServerConfig {
                url,
                timeout: Duration::from_secs(args.timeout.max(1)),
                transports,
            },
            reconnect,
            stream,
            session: SessionConfig {
                recording_id: args.recording.clone(),
                job_ids: args.jobs.clone(),
                model_id: args.model.clone(),
                upload_chunks: args.upload,
                chunk_size: args.chunk_size,
                inference_interval,
                duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
                rejoin: args.rejoin.parse()?,
            },
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            output: OutputConfig {
                format: OutputFormat::from(args.format.as_str()),
                colored: !args.no_color,
                quiet: args.quiet,
            },
        })
    }
}
