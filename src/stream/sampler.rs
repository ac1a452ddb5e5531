// file: src/stream/sampler.rs
// description: Fixed-rate sampling cadence feeding the stream buffer

use super::{
    DataPoint, StreamBuffer,
    bands::BandMetric,
    source::{SampleSource, SyntheticEeg},
};
use crate::{
    client_state::lock,
    config::StreamConfig,
    error::{RealtimeError, Result},
};
use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};
use tokio::{
    runtime::Handle,
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Streaming,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Idle => f.write_str("idle"),
            StreamStatus::Streaming => f.write_str("streaming"),
        }
    }
}

/// Point-in-time copy of the buffer for consumers.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub status: StreamStatus,
    pub points: Vec<DataPoint>,
    pub metrics: Arc<[BandMetric]>,
    pub insertions: u64,
    pub recomputations: u64,
    pub capacity: usize,
    pub rate_hz: u32,
    pub channel_labels: Vec<String>,
}

impl StreamSnapshot {
    /// The most recent `count` points, oldest first.
    pub fn latest(&self, count: usize) -> &[DataPoint] {
        let start = self.points.len().saturating_sub(count);
        &self.points[start..]
    }
}

struct SamplerState {
    status: StreamStatus,
    buffer: StreamBuffer,
    config: StreamConfig,
    source: Box<dyn SampleSource>,
    // Bumped on every start and stop; a cadence task only appends while its token is current.
    generation: u64,
    cadence: Option<JoinHandle<()>>,
    started_wall_ms: i64,
    started_at: Instant,
}

impl SamplerState {
    fn tick(&mut self) {
        let elapsed = self.started_at.elapsed();
        let timestamp = self.started_wall_ms + elapsed.as_millis() as i64;

        let source = &mut self.source;
        let values = self
            .config
            .channel_labels
            .iter()
            .enumerate()
            .map(|(index, label)| (label.clone(), source.sample(elapsed, label, index)))
            .collect::<Vec<_>>();
        self.buffer.append(DataPoint::new(timestamp, values));
    }
}

struct Shared {
    state: Mutex<SamplerState>,
    version: watch::Sender<u64>,
}

impl Shared {
    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

/// Drives one periodic generation loop into a [`StreamBuffer`].
///
/// At most one cadence runs at a time: starting again replaces the running loop.
/// Dropping the sampler stops it.
pub struct Sampler {
    shared: Arc<Shared>,
}

impl Sampler {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_source(config, SyntheticEeg::new())
    }

    pub fn with_source(config: StreamConfig, source: impl SampleSource) -> Self {
        let (version, _) = watch::channel(0);
        let buffer = StreamBuffer::new(config.capacity, f64::from(config.rate_hz));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SamplerState {
                    status: StreamStatus::Idle,
                    buffer,
                    config,
                    source: Box::new(source),
                    generation: 0,
                    cadence: None,
                    started_wall_ms: chrono::Utc::now().timestamp_millis(),
                    started_at: Instant::now(),
                }),
                version,
            }),
        }
    }

    /// Begin producing one point per tick at `config.rate_hz`.
    ///
    /// A running cadence is stopped first, so the new configuration takes over with a
    /// single active loop. Buffered points are kept unless cleared. On error the
    /// sampler is left as it was.
    pub fn start(&self, config: &StreamConfig) -> Result<()> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;

        let mut state = lock(&self.shared.state);
        if let Some(previous) = state.cadence.take() {
            debug!("Replacing running cadence");
            previous.abort();
        }
        state.generation += 1;
        state
            .buffer
            .reconfigure(config.capacity, f64::from(config.rate_hz));
        state.config = config.clone();
        state.status = StreamStatus::Streaming;
        state.started_wall_ms = chrono::Utc::now().timestamp_millis();
        state.started_at = Instant::now();

        let period = config.period();
        state.cadence = Some(runtime.spawn(run_cadence(
            Arc::downgrade(&self.shared),
            state.generation,
            state.started_at + period,
            period,
        )));
        info!(
            rate_hz = config.rate_hz,
            capacity = config.capacity,
            channels = config.channel_labels.len(),
            "Live stream started"
        );
        Ok(())
    }

    /// Cancel the cadence. Buffered data stays. Returns whether a cadence was running.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.shared.state);
        state.generation += 1;
        let was_running = state.status == StreamStatus::Streaming;
        if let Some(cadence) = state.cadence.take() {
            cadence.abort();
        }
        state.status = StreamStatus::Idle;
        if was_running {
            info!(insertions = state.buffer.insertions(), "Live stream stopped");
        }
        was_running
    }

    /// Empty points and metrics without touching the running status.
    pub fn clear(&self) {
        lock(&self.shared.state).buffer.clear();
        self.shared.bump();
        debug!("Live stream buffer cleared");
    }

    /// Append an externally produced point through the same window and metric path.
    pub fn push(&self, point: DataPoint) {
        lock(&self.shared.state).buffer.append(point);
        self.shared.bump();
    }

    pub fn status(&self) -> StreamStatus {
        lock(&self.shared.state).status
    }

    pub fn config(&self) -> StreamConfig {
        lock(&self.shared.state).config.clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = lock(&self.shared.state);
        StreamSnapshot {
            status: state.status,
            points: state.buffer.window().to_vec(),
            metrics: state.buffer.metrics(),
            insertions: state.buffer.insertions(),
            recomputations: state.buffer.recomputations(),
            capacity: state.buffer.capacity(),
            rate_hz: state.config.rate_hz,
            channel_labels: state.config.channel_labels.clone(),
        }
    }

    /// Receiver whose value changes after every append or clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_cadence(
    shared: Weak<Shared>,
    generation: u64,
    first_tick: Instant,
    period: std::time::Duration,
) {
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        {
            let mut state = lock(&shared.state);
            if state.generation != generation || state.status != StreamStatus::Streaming {
                return;
            }
            state.tick();
        }
        shared.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(rate_hz: u32, capacity: usize) -> StreamConfig {
        StreamConfig::new(rate_hz, capacity, vec!["O1".to_string(), "C3".to_string()])
    }

    fn counting_sampler(config: &StreamConfig) -> Sampler {
        let mut n = 0.0;
        Sampler::with_source(config.clone(), move |_: Duration, _: &str, _: usize| {
            n += 1.0;
            n
        })
    }

    #[tokio::test(start_paused = true)]
    async fn five_seconds_at_ten_hz() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(5_050)).await;

        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.points.len(), 50);
        assert_eq!(snapshot.insertions, 50);
        assert_eq!(snapshot.recomputations, 5);
        assert_eq!(snapshot.metrics.len(), 5);
        assert!(snapshot.points.iter().all(|p| p.values.len() == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn eight_seconds_into_a_window_of_fifty() {
        let cfg = config(10, 50);
        let sampler = counting_sampler(&cfg);
        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(8_050)).await;

        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.points.len(), 50);
        assert_eq!(snapshot.recomputations, 8);
        // two channels per tick: the oldest 30 ticks (60 samples) were evicted
        assert_eq!(snapshot.points[0].values["O1"], 61.0);
        let timestamps: Vec<i64> = snapshot.points.iter().map(|p| p.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_one_cadence() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        sampler.start(&cfg).unwrap();
        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(5_050)).await;

        assert_eq!(sampler.snapshot().insertions, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_keeps_configured_rate() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(2_050)).await;
        assert!(sampler.stop());
        assert_eq!(sampler.snapshot().insertions, 20);

        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.insertions, 30);
        assert_eq!(snapshot.recomputations, 3);
        assert_eq!(snapshot.points.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_freezes_data() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        assert!(!sampler.stop());

        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(sampler.stop());
        assert!(!sampler.stop());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.status, StreamStatus::Idle);
        assert_eq!(snapshot.insertions, 10);
        assert_eq!(snapshot.metrics.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_keeps_status_in_both_states() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        sampler.start(&cfg).unwrap();
        tokio::time::sleep(Duration::from_millis(1_550)).await;

        sampler.clear();
        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.status, StreamStatus::Streaming);
        assert!(snapshot.points.is_empty());
        assert!(snapshot.metrics.is_empty());

        sampler.stop();
        sampler.clear();
        assert_eq!(sampler.status(), StreamStatus::Idle);
        assert!(sampler.snapshot().points.is_empty());
    }

    #[test]
    fn start_without_runtime_stays_idle() {
        let cfg = config(10, 100);
        let sampler = counting_sampler(&cfg);
        assert!(matches!(sampler.start(&cfg), Err(RealtimeError::NoRuntime)));
        assert_eq!(sampler.status(), StreamStatus::Idle);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let sampler = counting_sampler(&config(10, 100));
        assert!(sampler.start(&config(10, 64)).is_err());
        assert_eq!(sampler.status(), StreamStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_points_share_the_metric_path() {
        let sampler = Sampler::new(config(10, 50));
        let mut updates = sampler.subscribe();
        for i in 0..10 {
            sampler.push(DataPoint::new(i, [("O1".to_string(), i as f64)]));
        }
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), 10);
        assert_eq!(sampler.snapshot().recomputations, 1);
    }
}
