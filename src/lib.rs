//! Realtime client for the EEG analysis platform.
//!
//! One [`ConnectionManager`] owns the Socket.IO connection to the platform server.
//! [`ChannelRegistry`] joins recording rooms and job subscriptions over it,
//! [`EventDispatcher`] routes named server events to registered handlers, and
//! [`stream::Sampler`] keeps a bounded sliding window of live samples with
//! periodically recomputed band-power metrics.
//!
//! ```no_run
//! # async fn run() -> eeg_realtime::Result<()> {
//! use eeg_realtime::{config::Config, context::RealtimeContext, protocol::JobProgress};
//! # let config: Config = unimplemented!();
//! let ctx = RealtimeContext::from_config(&config)?;
//! let disposer = ctx.events.on_typed("job_progress", |progress: JobProgress| {
//!     println!("{} at {:.0}%", progress.job_id, progress.progress);
//! })?;
//! ctx.channels.subscribe_job("J1")?;
//! // ...
//! disposer.dispose();
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Recording rooms, job subscriptions and rejoin policy.
pub mod channels;
/// Command-line argument definitions.
pub mod cli;
/// Connection state values and per-connection counters.
pub mod client_state;
/// Runtime configuration model.
pub mod config;
/// Connection manager and reconnection scheduler.
pub mod connection;
/// Context object wiring the components to one connection.
pub mod context;
/// Named-event handlers and disposers.
pub mod dispatcher;
/// Error types used across the crate.
pub mod error;
/// Lifecycle notifications and the presentation feed.
pub mod events;
/// Terminal output formatters.
pub mod formatter;
/// Metrics and health status structures.
pub mod monitoring;
/// Engine.IO / Socket.IO codec and realtime payloads.
pub mod protocol;
/// Live session lifecycle.
pub mod session;
/// Sliding window, band metrics and sampler.
pub mod stream;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Transport links and connectors.
pub mod transport;
/// UI controller and presentation loop.
pub mod ui;

pub use channels::{Channel, ChannelKind, ChannelRegistry, RejoinPolicy};
pub use client_state::ConnectionState;
pub use connection::{Connection, ConnectionManager};
pub use dispatcher::{Disposer, EventDispatcher, Handler};
/// Primary crate error type.
pub use error::{RealtimeError, Result};
pub use events::LifecycleEvent;
