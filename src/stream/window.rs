use super::DataPoint;
use std::collections::VecDeque;

/// Fixed-capacity, arrival-ordered buffer. Pushing past capacity evicts the oldest point.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    points: VecDeque<DataPoint>,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `point`; returns how many old points were evicted.
    pub fn push(&mut self, point: DataPoint) -> usize {
        let mut evicted = 0;
        while self.points.len() >= self.capacity {
            self.points.pop_front();
            evicted += 1;
        }
        self.points.push_back(point);
        evicted
    }

    /// Change capacity, dropping the oldest points if the window shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<DataPoint> {
        self.points.iter().cloned().collect()
    }

    /// Samples for `label` in arrival order; points missing the label count as 0.
    pub fn channel_series(&self, label: &str) -> Vec<f64> {
        self.points
            .iter()
            .map(|point| point.values.get(label).copied().unwrap_or(0.0))
            .collect()
    }

    /// Labels seen in the window, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .points
            .iter()
            .flat_map(|point| point.values.keys().cloned())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}
