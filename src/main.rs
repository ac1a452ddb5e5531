use anyhow::Result;
use clap::Parser;
use eeg_realtime::{
    cli::Args,
    config::Config,
    context::RealtimeContext,
    events::{FeedEvent, create_feed_channel},
    formatter::LiveFormatter,
    monitoring::{HealthStatus, setup_metrics},
    session::LiveSession,
    stream::Sampler,
    tracing_setup::setup_tracing,
    ui::{UIController, UIOptions},
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_tracing(&args.log_level, args.json_logs)?;
    info!("Starting EEG realtime client v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
        info!("Metrics server started on port {}", config.metrics.port);
    }

    let ctx = RealtimeContext::from_config(&config)?;
    let (feed_tx, feed_rx) = create_feed_channel();

    let mut ui = UIController::new(
        feed_rx,
        UIOptions {
            format: config.output.format,
            colored: config.output.colored,
            quiet: config.output.quiet,
        },
    );
    let ui_task = tokio::spawn(async move {
        ui.run().await;
        ui
    });

    let sampler = Arc::new(Sampler::new(config.stream.clone()));
    let started = Instant::now();
    let mut session = match LiveSession::open(
        &ctx,
        &config.session,
        &config.stream,
        sampler.clone(),
        feed_tx.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open live session: {}", e);
            let _ = feed_tx.send(FeedEvent::Stopping).await;
            let _ = ui_task.await;
            ctx.shutdown().await;
            return Err(e.into());
        }
    };

    info!("Live session running. Press Ctrl+C to shutdown...");
    match config.session.duration {
        Some(duration) => tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = tokio::time::sleep(duration) => info!("Configured duration elapsed"),
        },
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    }

    session.close();
    let snapshot = sampler.snapshot();
    if let Some(connection) = ctx.manager.current() {
        let health = HealthStatus::from_client(
            &connection.stats(),
            connection.state().as_str(),
            snapshot.insertions,
        );
        info!("Final health: {}", health.to_json());
    }
    ctx.shutdown().await;

    let _ = feed_tx.send(FeedEvent::Stopping).await;
    match ui_task.await {
        Ok(ui) => {
            let formatter = LiveFormatter::new(
                config.output.format,
                config.output.colored,
                config.output.quiet,
            );
            formatter.print_summary(
                snapshot.insertions.max(ui.samples_seen()),
                snapshot.recomputations.max(ui.recomputations_seen()),
                started.elapsed().as_secs(),
            );
        }
        Err(e) => error!("UI task failed: {}", e),
    }

    info!("Client stopped successfully");
    Ok(())
}
