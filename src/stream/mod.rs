// file: src/stream/mod.rs
// description: Live sample feed, sliding window and derived band metrics

use serde::Serialize;
use std::collections::BTreeMap;

/// Relative band power computation.
pub mod bands;
/// Window plus periodically recomputed metrics.
pub mod buffer;
/// Fixed-rate sampling loop.
pub mod sampler;
/// Sample generators.
pub mod source;
/// Fixed-capacity FIFO of data points.
pub mod window;

pub use bands::{BANDS, Band, BandMetric, compute_band_metrics};
pub use buffer::{RECOMPUTE_EVERY, StreamBuffer};
pub use sampler::{Sampler, StreamSnapshot, StreamStatus};
pub use source::{SampleSource, SyntheticEeg};
pub use window::SlidingWindow;

/// One timestamped sample per channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub values: BTreeMap<String, f64>,
}

impl DataPoint {
    pub fn new(timestamp: i64, values: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            timestamp,
            values: values.into_iter().collect(),
        }
    }
}
