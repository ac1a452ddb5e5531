use super::{
    DataPoint, SlidingWindow,
    bands::{BandMetric, compute_band_metrics},
};
use crate::monitoring;
use std::sync::Arc;
use tracing::trace;

/// Band metrics are rebuilt after this many appends.
pub const RECOMPUTE_EVERY: u64 = 10;

/// Sliding window plus the band metrics derived from it.
///
/// The metric set is swapped as a whole on each recomputation; readers holding the
/// previous `Arc` keep a consistent, if stale, set.
#[derive(Debug)]
pub struct StreamBuffer {
    window: SlidingWindow,
    metrics: Arc<[BandMetric]>,
    sample_rate_hz: f64,
    insertions: u64,
    recomputations: u64,
}

impl StreamBuffer {
    pub fn new(capacity: usize, sample_rate_hz: f64) -> Self {
        Self {
            window: SlidingWindow::new(capacity),
            metrics: Arc::from(Vec::new()),
            sample_rate_hz,
            insertions: 0,
            recomputations: 0,
        }
    }

    /// Append one point; returns true when the append triggered a recomputation.
    pub fn append(&mut self, point: DataPoint) -> bool {
        self.window.push(point);
        self.insertions += 1;
        monitoring::SAMPLES_COUNTER.increment(1);

        if self.insertions % RECOMPUTE_EVERY != 0 {
            return false;
        }
        self.metrics = compute_band_metrics(&self.window, self.sample_rate_hz).into();
        self.recomputations += 1;
        monitoring::BAND_RECOMPUTE_COUNTER.increment(1);
        trace!(recomputations = self.recomputations, "Band metrics recomputed");
        true
    }

    /// Empty the window and the metric set, and restart the append count.
    pub fn clear(&mut self) {
        self.window.clear();
        self.metrics = Arc::from(Vec::new());
        self.insertions = 0;
        self.recomputations = 0;
    }

    /// Apply new capacity and rate; existing points are kept up to the new capacity.
    pub fn reconfigure(&mut self, capacity: usize, sample_rate_hz: f64) {
        self.window.set_capacity(capacity);
        self.sample_rate_hz = sample_rate_hz;
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn metrics(&self) -> Arc<[BandMetric]> {
        self.metrics.clone()
    }

    pub fn insertions(&self) -> u64 {
        self.insertions
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: u64) -> DataPoint {
        let value = (i as f64 * 0.7).sin();
        DataPoint::new(i as i64, [("O1".to_string(), value), ("O2".to_string(), -value)])
    }

    #[test]
    fn recomputes_every_tenth_append() {
        let mut buffer = StreamBuffer::new(100, 10.0);
        for n in 1..=95u64 {
            let recomputed = buffer.append(point(n));
            assert_eq!(recomputed, n % 10 == 0);
            assert_eq!(buffer.recomputations(), n / 10);
        }
        assert_eq!(buffer.window().len(), 95);
    }

    #[test]
    fn metrics_are_replaced_as_a_whole() {
        let mut buffer = StreamBuffer::new(50, 10.0);
        assert!(buffer.metrics().is_empty());
        for n in 1..=10 {
            buffer.append(point(n));
        }
        let first = buffer.metrics();
        assert_eq!(first.len(), 5);

        for n in 11..=20 {
            buffer.append(point(n));
        }
        // the old set is untouched by the recompute
        assert_eq!(first.len(), 5);
        assert!(!Arc::ptr_eq(&first, &buffer.metrics()));
    }

    #[test]
    fn recomputation_reads_but_never_mutates_history() {
        let mut buffer = StreamBuffer::new(50, 10.0);
        for n in 1..=9 {
            buffer.append(point(n));
        }
        let before = buffer.window().to_vec();
        buffer.append(point(10));
        let after = buffer.window().to_vec();
        assert_eq!(&after[..9], &before[..]);
    }

    #[test]
    fn clear_resets_points_metrics_and_counts() {
        let mut buffer = StreamBuffer::new(50, 10.0);
        for n in 1..=30 {
            buffer.append(point(n));
        }
        buffer.clear();
        assert!(buffer.window().is_empty());
        assert!(buffer.metrics().is_empty());
        assert_eq!(buffer.insertions(), 0);
        assert_eq!(buffer.recomputations(), 0);
    }
}
