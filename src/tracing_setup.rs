// file: src/tracing_setup.rs
// description: structured logging setup for the realtime client and live stream
// reference: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Filter directive for `log_level`, scoped to this crate.
pub fn filter_directive(log_level: &str) -> String {
    format!("eeg_realtime={}", log_level.trim().to_lowercase())
}

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays free for band and event output. `RUST_LOG`
/// overrides `log_level` when set.
pub fn setup_tracing(log_level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if json_logs {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .with_span_list(true)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_this_crate() {
        assert_eq!(filter_directive(" DEBUG "), "eeg_realtime=debug");
        assert!(EnvFilter::try_new(filter_directive("warn")).is_ok());
    }
}
