use eeg_realtime::{
    Channel, ConnectionState, LifecycleEvent, RejoinPolicy,
    config::{ReconnectPolicy, ServerConfig},
    context::RealtimeContext,
    dispatcher::Handler,
    protocol::{JobProgress, OutboundMessage},
    transport::memory::{MemoryConnector, MemoryServer, memory_pair},
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use url::Url;

fn context(rejoin: RejoinPolicy) -> (RealtimeContext, Arc<MemoryConnector>, MemoryServer) {
    let (connector, server) = memory_pair();
    let server_config = ServerConfig::new(Url::parse("http://localhost:5000").unwrap());
    let ctx = RealtimeContext::with_connector(
        server_config,
        ReconnectPolicy::default(),
        connector.clone(),
        rejoin,
    )
    .unwrap();
    (ctx, connector, server)
}

fn recording_handler() -> (Handler, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: Handler = Arc::new(move |payload: &Value| {
        let _ = tx.send(payload.clone());
    });
    (handler, rx)
}

async fn wait_for(ctx: &RealtimeContext, state: ConnectionState) {
    let connection = ctx.manager.current().unwrap();
    connection
        .watch_state()
        .wait_for(|s| *s == state)
        .await
        .unwrap();
}

#[tokio::test]
async fn connect_is_idempotent_across_components() {
    let (ctx, connector, mut server) = context(RejoinPolicy::Manual);

    let first = ctx.manager.connect().unwrap();
    ctx.events.on_fn("job_progress", |_| {}).unwrap();
    ctx.channels.subscribe_job("J1").unwrap();
    let second = ctx.manager.connect().unwrap();

    assert!(first.same_as(&second));
    let _peer = server.accept_connected("sid-1").await.unwrap();
    wait_for(&ctx, ConnectionState::Connected).await;
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test]
async fn leave_without_connection_is_a_quiet_no_op() {
    let (ctx, connector, mut server) = context(RejoinPolicy::Manual);
    let room = Channel::recording("R1");

    ctx.channels.leave(&room);
    assert_eq!(connector.open_count(), 0);
    assert!(ctx.manager.current().is_none());
    assert!(!ctx.events.off("job_progress", &recording_handler().0));
    assert_eq!(connector.open_count(), 0);

    ctx.channels.join(room.clone()).unwrap();
    ctx.channels.leave(&room);
    assert!(!ctx.channels.is_member(&room));

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    assert_eq!(
        peer.next_event().await.unwrap(),
        ("join_recording".to_string(), json!({ "recording_id": "R1" }))
    );
    assert_eq!(
        peer.next_event().await.unwrap(),
        ("leave_recording".to_string(), json!({ "recording_id": "R1" }))
    );
}

#[tokio::test]
async fn joining_twice_sends_twice_but_tracks_once() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let room = Channel::recording("R1");
    ctx.channels.join(room.clone()).unwrap();
    ctx.channels.join(room.clone()).unwrap();
    assert_eq!(ctx.channels.members(), vec![room]);

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    for _ in 0..2 {
        let (name, payload) = peer.next_event().await.unwrap();
        assert_eq!(name, "join_recording");
        assert_eq!(payload["recording_id"], "R1");
    }
}

#[tokio::test]
async fn disposing_one_handler_keeps_the_other() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let (h1, mut rx1) = recording_handler();
    let (h2, mut rx2) = recording_handler();

    let d1 = ctx.events.on("recording_update", h1).unwrap();
    let _d2 = ctx.events.on("recording_update", h2).unwrap();
    assert_eq!(ctx.events.handler_count("recording_update"), 2);

    d1.dispose();
    d1.dispose();
    assert!(d1.is_disposed());
    assert_eq!(ctx.events.handler_count("recording_update"), 1);

    let peer = server.accept_connected("sid-1").await.unwrap();
    peer.emit("recording_update", json!({ "recording_id": "R1" }))
        .await
        .unwrap();

    assert_eq!(rx2.recv().await.unwrap()["recording_id"], "R1");
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn off_removes_by_handler_identity() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let (h1, mut rx1) = recording_handler();
    let (h2, mut rx2) = recording_handler();
    ctx.events.on("recording_update", h1.clone()).unwrap();
    ctx.events.on("recording_update", h2).unwrap();

    assert!(ctx.events.off("recording_update", &h1));
    assert!(!ctx.events.off("recording_update", &h1));

    let peer = server.accept_connected("sid-1").await.unwrap();
    peer.emit("recording_update", json!({ "recording_id": "R2" }))
        .await
        .unwrap();
    assert_eq!(rx2.recv().await.unwrap()["recording_id"], "R2");
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn typed_handlers_skip_malformed_payloads() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.events
        .on_typed("job_progress", move |progress: JobProgress| {
            let _ = tx.send(progress);
        })
        .unwrap();

    let peer = server.accept_connected("sid-1").await.unwrap();
    peer.emit("job_progress", json!({ "progress": "half" }))
        .await
        .unwrap();
    peer.emit("job_progress", json!({ "job_id": "J1", "step": "training", "progress": 40.0 }))
        .await
        .unwrap();

    let progress = rx.recv().await.unwrap();
    assert_eq!(progress.job_id, "J1");
    assert_eq!(progress.step.as_deref(), Some("training"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn outbound_messages_use_wire_names() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    ctx.events
        .send(&OutboundMessage::RequestInference {
            recording_id: "R1".to_string(),
            model_id: "M1".to_string(),
        })
        .unwrap();
    ctx.events.emit("custom", &json!({ "k": 1 })).unwrap();

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    assert_eq!(
        peer.next_event().await.unwrap(),
        (
            "request_inference".to_string(),
            json!({ "recording_id": "R1", "model_id": "M1" })
        )
    );
    assert_eq!(
        peer.next_event().await.unwrap(),
        ("custom".to_string(), json!({ "k": 1 }))
    );
}

#[tokio::test]
async fn reserved_names_reach_named_handlers() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.events
        .on_fn("connect", move |payload| {
            let _ = tx.send(payload.clone());
        })
        .unwrap();

    let _peer = server.accept_connected("sid-1").await.unwrap();
    let payload = rx.recv().await.unwrap();
    assert_eq!(payload["transport"], "websocket");
}

#[tokio::test]
async fn disconnect_makes_registrations_stale() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let disposer = ctx.events.on_fn("job_progress", |_| {}).unwrap();
    ctx.channels.join_recording("R1").unwrap();
    let _peer = server.accept_connected("sid-1").await.unwrap();
    wait_for(&ctx, ConnectionState::Connected).await;

    ctx.shutdown().await;
    assert_eq!(ctx.manager.state(), ConnectionState::Disconnected);
    assert_eq!(ctx.events.handler_count("job_progress"), 0);
    // membership survives so the caller can rejoin explicitly
    assert!(ctx.channels.is_member(&Channel::recording("R1")));

    let fresh = ctx.manager.connect().unwrap();
    assert_eq!(ctx.events.handler_count("job_progress"), 0);
    disposer.dispose();
    assert_eq!(fresh.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn reconnect_does_not_rejoin_by_default() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Manual);
    let mut lifecycle = ctx.manager.subscribe_lifecycle();
    ctx.channels.join_recording("R1").unwrap();

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    assert_eq!(peer.next_event().await.unwrap().0, "join_recording");
    wait_for(&ctx, ConnectionState::Connected).await;

    let dropped_at = Instant::now();
    drop(peer);
    let mut peer = server.accept_connected("sid-2").await.unwrap();
    wait_for(&ctx, ConnectionState::Connected).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(1_000));

    ctx.events.emit("marker", &json!(null)).unwrap();
    assert_eq!(peer.next_event().await.unwrap().0, "marker");

    let mut states = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        if let Some(state) = event.state() {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connected,
        ]
    );

    // explicit manual rejoin
    assert_eq!(ctx.channels.rejoin_all().unwrap(), 1);
    assert_eq!(peer.next_event().await.unwrap().0, "join_recording");
}

#[tokio::test(start_paused = true)]
async fn automatic_policy_rejoins_after_reconnect() {
    let (ctx, _connector, mut server) = context(RejoinPolicy::Automatic);
    ctx.channels.join_recording("R1").unwrap();
    ctx.channels.subscribe_job("J1").unwrap();

    let mut peer = server.accept_connected("sid-1").await.unwrap();
    assert_eq!(peer.next_event().await.unwrap().0, "join_recording");
    assert_eq!(peer.next_event().await.unwrap().0, "subscribe_job");
    drop(peer);

    let mut peer = server.accept_connected("sid-2").await.unwrap();
    let mut rejoined = vec![
        peer.next_event().await.unwrap(),
        peer.next_event().await.unwrap(),
    ];
    rejoined.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        rejoined,
        vec![
            ("join_recording".to_string(), json!({ "recording_id": "R1" })),
            ("subscribe_job".to_string(), json!({ "job_id": "J1" })),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnection_reports_failed_and_recovers_on_connect() {
    let (ctx, connector, mut server) = context(RejoinPolicy::Manual);
    let mut lifecycle = ctx.manager.subscribe_lifecycle();
    connector.refuse_next(u32::MAX);

    ctx.manager.connect().unwrap();
    wait_for(&ctx, ConnectionState::Failed).await;

    let mut failed = false;
    let mut last_reconnect_attempt = 0;
    while let Ok(event) = lifecycle.try_recv() {
        match event {
            LifecycleEvent::Reconnecting { attempt, .. } => last_reconnect_attempt = attempt,
            LifecycleEvent::Failed { attempts, .. } => {
                failed = true;
                assert_eq!(attempts, 5);
            }
            _ => {}
        }
    }
    assert!(failed);
    assert_eq!(last_reconnect_attempt, 5);

    connector.refuse_next(0);
    ctx.manager.connect().unwrap();
    let _peer = server.accept_connected("sid-ok").await.unwrap();
    wait_for(&ctx, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn handlers_survive_reconnect_after_failure() {
    let (ctx, connector, mut server) = context(RejoinPolicy::Manual);
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.events
        .on_typed("job_progress", move |progress: JobProgress| {
            let _ = tx.send(progress.job_id);
        })
        .unwrap();
    connector.refuse_next(u32::MAX);
    wait_for(&ctx, ConnectionState::Failed).await;
    let failed = ctx.manager.current().unwrap();
    assert_eq!(ctx.events.handler_count("job_progress"), 1);

    connector.refuse_next(0);
    ctx.events.emit("stream_data", &json!({ "recording_id": "R1" })).unwrap();
    assert!(!ctx.manager.current().unwrap().same_as(&failed));
    assert_eq!(ctx.events.handler_count("job_progress"), 1);

    let peer = server.accept_connected("sid-2").await.unwrap();
    peer.emit("job_progress", json!({ "job_id": "J7", "progress": 10.0 }))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), "J7");
}
