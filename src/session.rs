// file: src/session.rs
// description: Scoped live session: handlers, memberships, sampler and uploads acquired together and released together

use crate::{
    channels::Channel,
    config::{SessionConfig, StreamConfig},
    context::RealtimeContext,
    dispatcher::Disposer,
    error::{RealtimeError, Result},
    events::{FeedEvent, FeedSender, LifecycleEvent},
    monitoring,
    protocol::{
        JobProgress, OutboundMessage, RealtimeFeatures, RealtimePrediction, RecordingUpdate, names,
    },
    stream::{DataPoint, Sampler, StreamSnapshot},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc::error::TrySendError},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

pub struct LiveSession {
    ctx: RealtimeContext,
    sampler: Arc<Sampler>,
    disposers: Vec<Disposer>,
    channels: Vec<Channel>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl LiveSession {
    /// Register live handlers, join the configured channels and start the sampler.
    ///
    /// Anything acquired before a failing step is released again before the error
    /// is returned.
    pub fn open(
        ctx: &RealtimeContext,
        session: &SessionConfig,
        stream: &StreamConfig,
        sampler: Arc<Sampler>,
        feed: FeedSender,
    ) -> Result<Self> {
        let mut live = LiveSession {
            ctx: ctx.clone(),
            sampler,
            disposers: Vec::new(),
            channels: Vec::new(),
            tasks: Vec::new(),
            closed: false,
        };

        if let Err(e) = live.acquire(session, stream, feed) {
            live.close();
            return Err(e);
        }
        Ok(live)
    }

    fn acquire(
        &mut self,
        session: &SessionConfig,
        stream: &StreamConfig,
        feed: FeedSender,
    ) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;

        // subscribe before the first handler triggers the connect
        self.tasks.push(runtime.spawn(forward_lifecycle(
            self.ctx.manager.subscribe_lifecycle(),
            feed.clone(),
        )));

        self.forward::<JobProgress>(names::JOB_PROGRESS, &feed, FeedEvent::JobProgress)?;
        self.forward::<RecordingUpdate>(names::RECORDING_UPDATE, &feed, FeedEvent::RecordingUpdate)?;
        self.forward::<RealtimeFeatures>(names::REALTIME_FEATURES, &feed, FeedEvent::Features)?;
        self.forward::<RealtimePrediction>(
            names::REALTIME_PREDICTION,
            &feed,
            FeedEvent::Prediction,
        )?;

        if let Some(recording_id) = &session.recording_id {
            self.join(Channel::recording(recording_id.clone()))?;
        }
        for job_id in &session.job_ids {
            self.join(Channel::job(job_id.clone()))?;
        }

        if session.upload_chunks && session.chunk_size > stream.capacity {
            return Err(RealtimeError::InvalidConfig(format!(
                "chunk size {} does not fit in a window of {} samples",
                session.chunk_size, stream.capacity
            )));
        }
        self.sampler.start(stream)?;

        let upload = match (&session.recording_id, session.upload_chunks) {
            (Some(recording_id), true) => Some(ChunkUpload {
                recording_id: recording_id.clone(),
                chunk_size: session.chunk_size.max(1),
                sfreq: stream.rate_hz,
                uploaded_mark: 0,
            }),
            _ => None,
        };
        self.tasks.push(runtime.spawn(forward_snapshots(
            self.ctx.clone(),
            self.sampler.clone(),
            feed.clone(),
            upload,
        )));

        if let (Some(every), Some(recording_id), Some(model_id)) = (
            session.inference_interval,
            &session.recording_id,
            &session.model_id,
        ) {
            let message = OutboundMessage::RequestInference {
                recording_id: recording_id.clone(),
                model_id: model_id.clone(),
            };
            self.tasks.push(runtime.spawn(request_inference(
                self.ctx.clone(),
                message,
                every,
            )));
        }

        info!(
            recording = session.recording_id.as_deref().unwrap_or("-"),
            jobs = session.job_ids.len(),
            "Live session opened"
        );
        Ok(())
    }

    fn forward<T>(
        &mut self,
        event: &'static str,
        feed: &FeedSender,
        wrap: fn(T) -> FeedEvent,
    ) -> Result<()>
    where
        T: DeserializeOwned + 'static,
    {
        let feed = feed.clone();
        let disposer = self.ctx.events.on_typed(event, move |payload: T| {
            deliver(&feed, wrap(payload));
        })?;
        self.disposers.push(disposer);
        Ok(())
    }

    fn join(&mut self, channel: Channel) -> Result<()> {
        self.ctx.channels.join(channel.clone())?;
        self.channels.push(channel);
        Ok(())
    }

    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release everything `open` acquired. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for disposer in self.disposers.drain(..) {
            disposer.dispose();
        }
        for channel in self.channels.drain(..) {
            self.ctx.channels.leave(&channel);
        }
        self.sampler.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Live session closed");
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn deliver(feed: &FeedSender, event: FeedEvent) {
    match feed.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("Feed full, dropping event"),
        Err(TrySendError::Closed(_)) => {}
    }
}

async fn forward_lifecycle(
    mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    feed: FeedSender,
) {
    loop {
        match lifecycle.recv().await {
            Ok(event) => {
                if feed.send(FeedEvent::Lifecycle(event)).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lifecycle forwarding lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

struct ChunkUpload {
    recording_id: String,
    chunk_size: usize,
    sfreq: u32,
    // Insertion count already covered by uploaded chunks.
    uploaded_mark: u64,
}

impl ChunkUpload {
    /// Chunks completed since the last call, oldest first.
    ///
    /// The mark only moves past samples that went out in a chunk, or that the
    /// window evicted before they could.
    fn take_chunks(&mut self, snapshot: &StreamSnapshot) -> Vec<OutboundMessage> {
        if snapshot.insertions < self.uploaded_mark {
            // buffer was cleared
            self.uploaded_mark = 0;
        }
        let pending = (snapshot.insertions - self.uploaded_mark) as usize;
        let recent = snapshot.latest(pending);
        if recent.len() < pending {
            let evicted = pending - recent.len();
            warn!(evicted, "Samples left the window before they were uploaded");
            self.uploaded_mark += evicted as u64;
        }

        let complete = recent.len() / self.chunk_size * self.chunk_size;
        self.uploaded_mark += complete as u64;
        recent[..complete]
            .chunks(self.chunk_size)
            .map(|points| OutboundMessage::StreamData {
                recording_id: self.recording_id.clone(),
                chunk: channel_major(points, &snapshot.channel_labels),
                sfreq: self.sfreq,
            })
            .collect()
    }
}

/// Rearrange points into one sample vector per channel, in label order.
fn channel_major(points: &[DataPoint], labels: &[String]) -> Vec<Vec<f64>> {
    labels
        .iter()
        .map(|label| {
            points
                .iter()
                .map(|point| point.values.get(label).copied().unwrap_or(0.0))
                .collect()
        })
        .collect()
}

async fn forward_snapshots(
    ctx: RealtimeContext,
    sampler: Arc<Sampler>,
    feed: FeedSender,
    mut upload: Option<ChunkUpload>,
) {
    let mut updates = sampler.subscribe();
    let mut last_recomputations = 0;

    while updates.changed().await.is_ok() {
        let snapshot = sampler.snapshot();

        if snapshot.recomputations != last_recomputations {
            last_recomputations = snapshot.recomputations;
            if snapshot.recomputations > 0 {
                deliver(&feed, FeedEvent::Snapshot(Arc::new(snapshot.clone())));
            }
        }

        if let Some(upload) = upload.as_mut() {
            for message in upload.take_chunks(&snapshot) {
                match ctx.events.send_if_live(&message) {
                    Ok(true) => monitoring::CHUNKS_UPLOADED_COUNTER.increment(1),
                    Ok(false) => debug!("Connection down, stream chunk not uploaded"),
                    Err(e) => warn!("Failed to upload stream chunk: {}", e),
                }
            }
        }
    }
}

async fn request_inference(
    ctx: RealtimeContext,
    message: OutboundMessage,
    every: std::time::Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately; wait one full period before asking
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match ctx.events.send_if_live(&message) {
            Ok(true) => {}
            Ok(false) => debug!("Connection down, inference request skipped"),
            Err(e) => warn!("Failed to request inference: {}", e),
        }
    }
}
