/// file: src/ui.rs
/// description: console consumer of the live feed: connection status, job progress and band output
use crate::{
    events::{FeedEvent, FeedReceiver, LifecycleEvent},
    formatter::{Colors, LiveFormatter, OutputFormat},
};
use tracing::debug;

pub struct UIController {
    feed: FeedReceiver,
    formatter: LiveFormatter,
    colored: bool,
    quiet_mode: bool,
    samples_seen: u64,
    recomputations_seen: u64,
}

pub struct UIOptions {
    pub format: OutputFormat,
    pub colored: bool,
    pub quiet: bool,
}

impl UIController {
    pub fn new(feed: FeedReceiver, options: UIOptions) -> Self {
        Self {
            feed,
            formatter: LiveFormatter::new(options.format, options.colored, options.quiet),
            colored: options.colored,
            quiet_mode: options.quiet,
            samples_seen: 0,
            recomputations_seen: 0,
        }
    }

    /// Render feed events until the feed closes or a `Stopping` event arrives.
    pub async fn run(&mut self) {
        self.print_startup_banner();
        while let Some(event) = self.feed.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn recomputations_seen(&self) -> u64 {
        self.recomputations_seen
    }

    fn handle_event(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Lifecycle(lifecycle) => self.handle_lifecycle(&lifecycle),
            FeedEvent::JobProgress(progress) => {
                self.formatter
                    .print_line(&self.formatter.format_job_progress(&progress));
            }
            FeedEvent::RecordingUpdate(update) => {
                self.formatter
                    .print_line(&self.formatter.format_recording_update(&update));
            }
            FeedEvent::Features(features) => {
                self.formatter
                    .print_line(&self.formatter.format_features(&features));
            }
            FeedEvent::Prediction(prediction) => {
                self.formatter
                    .print_line(&self.formatter.format_prediction(&prediction));
            }
            FeedEvent::Snapshot(snapshot) => {
                self.samples_seen = snapshot.insertions;
                self.recomputations_seen = snapshot.recomputations;
                self.formatter.print_bands(&snapshot);
            }
            FeedEvent::Stopping => {
                self.print_connection_status("STOPPING", "Client shutting down");
                return false;
            }
        }

        true
    }

    fn handle_lifecycle(&self, event: &LifecycleEvent) {
        debug!(connection_id = event.connection_id(), "Lifecycle: {:?}", event);
        match event {
            LifecycleEvent::Connecting { connection_id } => {
                self.print_connection_status("CONNECTING", &format!("ID: {connection_id}"));
            }
            LifecycleEvent::Connected {
                transport,
                reconnected,
                ..
            } => {
                let message = if *reconnected {
                    format!("Reconnected over {transport}")
                } else {
                    format!("Connected over {transport}")
                };
                self.print_connection_status("CONNECTED", &message);
            }
            LifecycleEvent::Disconnected { reason, .. } => {
                self.print_connection_status("DISCONNECTED", reason);
            }
            LifecycleEvent::Reconnecting { attempt, delay, .. } => {
                self.print_reconnect_info(delay.as_millis(), *attempt);
            }
            LifecycleEvent::Error { message, .. } => {
                self.print_error("CONNECTION ERROR", message);
            }
            LifecycleEvent::Failed { attempts, .. } => {
                self.print_error(
                    "CONNECTION FAILED",
                    &format!("Gave up after {attempts} reconnection attempts"),
                );
            }
        }
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.colored { color } else { "" }
    }

    fn print_startup_banner(&self) {
        if self.quiet_mode {
            return;
        }

        let frame = format!("{}{}", self.paint(Colors::BOLD), self.paint(Colors::BRIGHT_CYAN));
        let reset = self.paint(Colors::RESET);
        println!();
        println!(
            "{}╔══════════════════════════════════════════════════════════════════════════════╗{}",
            frame, reset
        );
        println!(
            "{}║                           EEG REALTIME CLIENT                                ║{}",
            frame, reset
        );
        println!(
            "{}╚══════════════════════════════════════════════════════════════════════════════╝{}",
            frame, reset
        );
        println!(
            "  Version: {}{}{}",
            self.paint(Colors::BRIGHT_GREEN),
            env!("CARGO_PKG_VERSION"),
            reset
        );
        println!();
    }

    fn print_connection_status(&self, status: &str, message: &str) {
        if self.quiet_mode {
            return;
        }

        let (color, symbol) = match status {
            "CONNECTING" => (Colors::BRIGHT_YELLOW, "*"),
            "CONNECTED" => (Colors::BRIGHT_GREEN, "+"),
            "DISCONNECTED" => (Colors::BRIGHT_RED, "X"),
            "STOPPING" => (Colors::BRIGHT_MAGENTA, "!"),
            _ => (Colors::WHITE, "-"),
        };

        println!(
            "{}{}[{}]{} {} {}{}{}",
            self.paint(Colors::BOLD),
            self.paint(color),
            status,
            self.paint(Colors::RESET),
            symbol,
            self.paint(Colors::WHITE),
            message,
            self.paint(Colors::RESET)
        );
    }

    fn print_error(&self, error_type: &str, message: &str) {
        println!(
            "{}{}[{}]{} ! {}{}{}",
            self.paint(Colors::BOLD),
            self.paint(Colors::BRIGHT_RED),
            error_type,
            self.paint(Colors::RESET),
            self.paint(Colors::RED),
            message,
            self.paint(Colors::RESET)
        );
    }

    fn print_reconnect_info(&self, delay_ms: u128, attempt: u32) {
        if self.quiet_mode {
            return;
        }
        println!(
            "{}{}[RECONNECTING]{} > Attempt {} in {}ms...",
            self.paint(Colors::BOLD),
            self.paint(Colors::BRIGHT_YELLOW),
            self.paint(Colors::RESET),
            attempt,
            delay_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_feed_channel;

    #[tokio::test]
    async fn stops_on_stopping_event() {
        let (tx, rx) = create_feed_channel();
        let mut ui = UIController::new(
            rx,
            UIOptions {
                format: OutputFormat::Minimal,
                colored: false,
                quiet: true,
            },
        );
        tx.send(FeedEvent::Stopping).await.unwrap();
        tx.send(FeedEvent::Stopping).await.unwrap();
        ui.run().await;
        // the second event is never consumed
        assert_eq!(ui.samples_seen(), 0);
        assert!(!tx.is_closed());
    }

    #[tokio::test]
    async fn snapshots_update_progress_counters() {
        use crate::stream::{StreamSnapshot, StreamStatus};
        use std::sync::Arc;

        let (tx, rx) = create_feed_channel();
        let mut ui = UIController::new(
            rx,
            UIOptions {
                format: OutputFormat::Minimal,
                colored: false,
                quiet: true,
            },
        );
        let snapshot = StreamSnapshot {
            status: StreamStatus::Streaming,
            points: Vec::new(),
            metrics: Arc::from(Vec::new()),
            insertions: 40,
            recomputations: 4,
            capacity: 50,
            rate_hz: 10,
            channel_labels: vec!["O1".to_string()],
        };
        tx.send(FeedEvent::Snapshot(Arc::new(snapshot))).await.unwrap();
        tx.send(FeedEvent::Stopping).await.unwrap();
        ui.run().await;

        assert_eq!(ui.samples_seen(), 40);
        assert_eq!(ui.recomputations_seen(), 4);
    }
}
