use eeg_realtime::{
    ConnectionState, RealtimeError, RejoinPolicy,
    config::{ReconnectPolicy, ServerConfig, SessionConfig, StreamConfig},
    context::RealtimeContext,
    events::{FeedEvent, FeedReceiver, create_feed_channel},
    session::LiveSession,
    stream::{Sampler, StreamStatus},
    transport::memory::{MemoryConnector, MemoryPeer, MemoryServer, memory_pair},
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use url::Url;

fn context() -> (RealtimeContext, Arc<MemoryConnector>, MemoryServer) {
    let (connector, server) = memory_pair();
    let ctx = RealtimeContext::with_connector(
        ServerConfig::new(Url::parse("http://localhost:5000").unwrap()),
        ReconnectPolicy::default(),
        connector.clone(),
        RejoinPolicy::Manual,
    )
    .unwrap();
    (ctx, connector, server)
}

fn stream_config() -> StreamConfig {
    StreamConfig::new(10, 50, vec!["O1".to_string(), "O2".to_string()])
}

async fn next_named(peer: &mut MemoryPeer, name: &str) -> Value {
    loop {
        let (event, payload) = peer.next_event().await.unwrap();
        if event == name {
            return payload;
        }
    }
}

async fn next_feed<T>(feed: &mut FeedReceiver, mut pick: impl FnMut(FeedEvent) -> Option<T>) -> T {
    loop {
        if let Some(found) = pick(feed.recv().await.unwrap()) {
            return found;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn session_joins_streams_and_uploads_chunks() {
    let (ctx, _connector, mut server) = context();
    let (feed_tx, mut feed_rx) = create_feed_channel();
    let sampler = Arc::new(Sampler::new(stream_config()));
    let session_config = SessionConfig {
        recording_id: Some("R1".to_string()),
        job_ids: vec!["J1".to_string()],
        upload_chunks: true,
        chunk_size: 10,
        ..SessionConfig::default()
    };

    let mut session = LiveSession::open(
        &ctx,
        &session_config,
        &stream_config(),
        sampler.clone(),
        feed_tx,
    )
    .unwrap();
    assert_eq!(sampler.status(), StreamStatus::Streaming);

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    assert_eq!(
        peer.next_event().await.unwrap(),
        ("join_recording".to_string(), json!({ "recording_id": "R1" }))
    );
    assert_eq!(
        peer.next_event().await.unwrap(),
        ("subscribe_job".to_string(), json!({ "job_id": "J1" }))
    );

    let chunk = next_named(&mut peer, "stream_data").await;
    assert_eq!(chunk["recording_id"], "R1");
    assert_eq!(chunk["sfreq"], 10);
    let channels = chunk["chunk"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].as_array().unwrap().len(), 10);

    let snapshot = next_feed(&mut feed_rx, |event| match event {
        FeedEvent::Snapshot(snapshot) => Some(snapshot),
        _ => None,
    })
    .await;
    assert_eq!(snapshot.metrics.len(), 5);
    assert!(snapshot.recomputations >= 1);

    peer.emit(
        "job_progress",
        json!({ "job_id": "J1", "progress": 50.0, "step": "training" }),
    )
    .await
    .unwrap();
    let progress = next_feed(&mut feed_rx, |event| match event {
        FeedEvent::JobProgress(progress) => Some(progress),
        _ => None,
    })
    .await;
    assert_eq!(progress.job_id, "J1");

    session.close();
    session.close();
    assert!(session.is_closed());
    assert_eq!(sampler.status(), StreamStatus::Idle);
    assert_eq!(ctx.events.handler_count("job_progress"), 0);
    assert!(ctx.channels.members().is_empty());

    let mut left = Vec::new();
    while left.len() < 2 {
        let (event, _) = peer.next_event().await.unwrap();
        if event.starts_with("leave") || event.starts_with("unsubscribe") {
            left.push(event);
        }
    }
    assert_eq!(left, vec!["leave_recording", "unsubscribe_job"]);
}

#[tokio::test(start_paused = true)]
async fn session_requests_inference_periodically() {
    let (ctx, _connector, mut server) = context();
    let (feed_tx, _feed_rx) = create_feed_channel();
    let sampler = Arc::new(Sampler::new(stream_config()));
    let session_config = SessionConfig {
        recording_id: Some("R1".to_string()),
        model_id: Some("M1".to_string()),
        inference_interval: Some(Duration::from_secs(2)),
        ..SessionConfig::default()
    };

    let _session =
        LiveSession::open(&ctx, &session_config, &stream_config(), sampler, feed_tx).unwrap();
    let mut peer = server.accept_connected("sid-1").await.unwrap();

    let started = tokio::time::Instant::now();
    let request = next_named(&mut peer, "request_inference").await;
    assert_eq!(request, json!({ "recording_id": "R1", "model_id": "M1" }));
    assert!(started.elapsed() >= Duration::from_millis(1_900));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_reaches_the_feed() {
    let (ctx, _connector, mut server) = context();
    let (feed_tx, mut feed_rx) = create_feed_channel();
    let sampler = Arc::new(Sampler::new(stream_config()));

    let _session = LiveSession::open(
        &ctx,
        &SessionConfig::default(),
        &stream_config(),
        sampler,
        feed_tx,
    )
    .unwrap();
    let _peer = server.accept_connected("sid-1").await.unwrap();

    let reconnected = next_feed(&mut feed_rx, |event| match event {
        FeedEvent::Lifecycle(eeg_realtime::LifecycleEvent::Connected { reconnected, .. }) => {
            Some(reconnected)
        }
        _ => None,
    })
    .await;
    assert!(!reconnected);
}

#[tokio::test(start_paused = true)]
async fn background_sends_do_not_revive_a_failed_connection() {
    let (ctx, connector, _server) = context();
    connector.refuse_next(u32::MAX);
    let (feed_tx, _feed_rx) = create_feed_channel();
    let sampler = Arc::new(Sampler::new(stream_config()));
    let session_config = SessionConfig {
        recording_id: Some("R1".to_string()),
        model_id: Some("M1".to_string()),
        upload_chunks: true,
        chunk_size: 10,
        inference_interval: Some(Duration::from_secs(1)),
        ..SessionConfig::default()
    };

    let _session =
        LiveSession::open(&ctx, &session_config, &stream_config(), sampler, feed_tx).unwrap();
    let failed = ctx.manager.current().unwrap();
    failed
        .watch_state()
        .wait_for(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();
    let opens = connector.open_count();

    // several chunk and inference periods pass without a live connection
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.open_count(), opens);
    assert!(ctx.manager.current().unwrap().same_as(&failed));
    assert_eq!(ctx.manager.state(), ConnectionState::Failed);
    assert_eq!(ctx.events.handler_count("job_progress"), 1);
}

#[tokio::test]
async fn chunk_larger_than_window_is_rejected() {
    let (ctx, _connector, _server) = context();
    let (feed_tx, _feed_rx) = create_feed_channel();
    let sampler = Arc::new(Sampler::new(stream_config()));
    let session_config = SessionConfig {
        recording_id: Some("R1".to_string()),
        upload_chunks: true,
        chunk_size: 200,
        ..SessionConfig::default()
    };

    let result = LiveSession::open(
        &ctx,
        &session_config,
        &stream_config(),
        sampler.clone(),
        feed_tx,
    );
    assert!(matches!(result, Err(RealtimeError::InvalidConfig(_))));
    assert_eq!(sampler.status(), StreamStatus::Idle);
    assert_eq!(ctx.events.handler_count("job_progress"), 0);
    assert!(ctx.channels.members().is_empty());
}
