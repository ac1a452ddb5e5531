use super::bands::BANDS;
use std::time::Duration;

/// Produces one numeric sample per channel per tick.
pub trait SampleSource: Send + 'static {
    /// Sample for `label` (the `index`th configured channel) at `elapsed` since the stream started.
    fn sample(&mut self, elapsed: Duration, label: &str, index: usize) -> f64;
}

impl<F> SampleSource for F
where
    F: FnMut(Duration, &str, usize) -> f64 + Send + 'static,
{
    fn sample(&mut self, elapsed: Duration, label: &str, index: usize) -> f64 {
        self(elapsed, label, index)
    }
}

// Centre frequency (Hz) and amplitude (µV) per band.
const COMPONENTS: [(f64, f64); BANDS.len()] = [
    (2.0, 20.0),
    (6.0, 10.0),
    (10.0, 15.0),
    (20.0, 5.0),
    (40.0, 2.0),
];

/// Synthetic EEG: a sum of one sine per band plus uniform noise.
///
/// Occipital channels (`O*`) carry a stronger alpha rhythm.
#[derive(Debug, Clone)]
pub struct SyntheticEeg {
    rng: fastrand::Rng,
    noise_amplitude: f64,
}

impl SyntheticEeg {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
            noise_amplitude: 5.0,
        }
    }

    /// Deterministic generator for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            noise_amplitude: 5.0,
        }
    }

    pub fn noise_amplitude(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.max(0.0);
        self
    }
}

impl Default for SyntheticEeg {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SyntheticEeg {
    fn sample(&mut self, elapsed: Duration, label: &str, index: usize) -> f64 {
        let t = elapsed.as_secs_f64();
        let phase = index as f64 * 0.35;
        let occipital = label.starts_with('O');

        let signal: f64 = COMPONENTS
            .iter()
            .enumerate()
            .map(|(band, (freq, amplitude))| {
                let gain = if occipital && band == 2 { 2.0 } else { 1.0 };
                gain * amplitude * (2.0 * std::f64::consts::PI * freq * t + phase).sin()
            })
            .sum();
        let noise = (self.rng.f64() * 2.0 - 1.0) * self.noise_amplitude;
        signal + noise
    }
}
