//! Relative band power over the sliding window.
//!
//! Each channel is mean-removed, Hann-windowed and transformed with a real FFT; the
//! power spectrum is summed per band and averaged across channels. Results are the
//! share of each band in the total power of the five bands, in percent.

use super::SlidingWindow;
use realfft::RealFftPlanner;
use serde::Serialize;

/// Frequency band with a half-open `[low, high)` range in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub name: &'static str,
    pub low: f64,
    pub high: f64,
}

pub const BANDS: [Band; 5] = [
    Band { name: "delta", low: 1.0, high: 4.0 },
    Band { name: "theta", low: 4.0, high: 8.0 },
    Band { name: "alpha", low: 8.0, high: 12.0 },
    Band { name: "beta", low: 12.0, high: 30.0 },
    Band { name: "gamma", low: 30.0, high: 45.0 },
];

// Fewer samples than this give no meaningful spectrum.
const MIN_SAMPLES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandMetric {
    pub name: &'static str,
    /// Relative power in percent, 0 to 100.
    pub power: f64,
}

pub fn empty_metrics() -> Vec<BandMetric> {
    BANDS
        .iter()
        .map(|band| BandMetric {
            name: band.name,
            power: 0.0,
        })
        .collect()
}

/// Band metrics for the current window contents. Pure: equal windows give equal results.
pub fn compute_band_metrics(window: &SlidingWindow, sample_rate_hz: f64) -> Vec<BandMetric> {
    let n = window.len();
    if n < MIN_SAMPLES || sample_rate_hz <= 0.0 {
        return empty_metrics();
    }

    let labels = window.labels();
    if labels.is_empty() {
        return empty_metrics();
    }

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let hann: Vec<f64> = (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
        .collect();
    let resolution = sample_rate_hz / n as f64;

    let mut band_power = [0.0f64; BANDS.len()];
    let mut channels = 0usize;

    for label in &labels {
        let series = window.channel_series(label);
        let mean = series.iter().sum::<f64>() / n as f64;

        let mut input: Vec<f64> = series
            .iter()
            .zip(&hann)
            .map(|(sample, weight)| (sample - mean) * weight)
            .collect();
        let mut spectrum = fft.make_output_vec();
        if fft.process(&mut input, &mut spectrum).is_err() {
            continue;
        }

        for (bin, value) in spectrum.iter().enumerate() {
            let freq = bin as f64 * resolution;
            let power = value.norm_sqr();
            for (slot, band) in band_power.iter_mut().zip(BANDS.iter()) {
                if freq >= band.low && freq < band.high {
                    *slot += power;
                }
            }
        }
        channels += 1;
    }

    if channels == 0 {
        return empty_metrics();
    }
    let averaged: Vec<f64> = band_power.iter().map(|p| p / channels as f64).collect();
    let total: f64 = averaged.iter().sum();
    if total <= f64::EPSILON {
        return empty_metrics();
    }

    BANDS
        .iter()
        .zip(averaged)
        .map(|(band, power)| BandMetric {
            name: band.name,
            power: (power / total * 100.0).clamp(0.0, 100.0),
        })
        .collect()
}
