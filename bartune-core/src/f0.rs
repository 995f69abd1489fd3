//! Stage 2: Fundamental (f0) tracking via frame-wise normalized autocorrelation.
//!
//! Each frame (~46 ms, hop = frame/4) is Hann-windowed, mean-removed and autocorrelated
//! with an FFT (zero-padded to twice the frame so the correlation is linear, not circular).
//! The lag search is restricted to `[sr/max_hz, sr/min_hz]`; that bound is what keeps
//! marimba fundamentals away from the tiny-lag alias peaks.
//!
//! Aggregation over frames:
//! - point estimate = median of per-frame f0
//! - confidence = 0.5·mean(frame confidence) + 0.5·1/(1 + var(f0)/median(f0)), clipped to [0,1]
//!
//! ```no_run
//! use bartune_core::f0::{F0Config, run_f0_step};
//! let samples = vec![0.0f32; 48_000];
//! let est = run_f0_step(&samples, 48_000, &F0Config::default())?;
//! println!("{:.2} Hz ({:.2})", est.f0_hz, est.confidence);
//! # Ok::<(), bartune_core::f0::F0Error>(())
//! ```

use realfft::{RealFftPlanner, num_complex::Complex64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{hann, mean, median, quantile, variance};
use crate::octave::F0Correction;

#[derive(Debug, Error)]
pub enum F0Error {
    #[error(
        "invalid f0 lag search window: lmin={lmin}, lmax={lmax}, frame_size={frame_size}, \
         sr={sample_rate}, min_hz={min_hz}, max_hz={max_hz}"
    )]
    Configuration {
        lmin: usize,
        lmax: usize,
        frame_size: usize,
        sample_rate: u32,
        min_hz: f64,
        max_hz: f64,
    },
    #[error(
        "unable to estimate f0: no frame produced a valid autocorrelation \
         ({n_samples} samples, frame_size={frame_size})"
    )]
    SilentOrDegenerate { n_samples: usize, frame_size: usize },
    #[error("empty segment: nothing to track")]
    EmptyInput,
    #[error("FFT error: {0}")]
    Fft(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct F0Config {
    /// Minimum and maximum f0 to consider (Hz); also the valid f0 range downstream.
    pub min_hz: f64,
    pub max_hz: f64,
    /// Frame length in seconds, rounded down to whole samples.
    pub frame_s: f64,
    /// Lower bound on the frame length (samples).
    pub min_frame: usize,
    /// Lower bound on the hop (samples); the hop is otherwise frame/4.
    pub min_hop: usize,
}

impl Default for F0Config {
    fn default() -> Self {
        Self {
            min_hz: 40.0,
            max_hz: 2000.0,
            frame_s: 0.046,
            min_frame: 1024,
            min_hop: 256,
        }
    }
}

impl F0Config {
    pub fn in_range(&self, hz: f64) -> bool {
        self.min_hz <= hz && hz <= self.max_hz
    }
}

/// Lag search bounds actually used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct F0Search {
    pub min_hz: f64,
    pub max_hz: f64,
    pub lmin: usize,
    pub lmax: usize,
    pub frame_size: usize,
    pub hop: usize,
    pub median_lag: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct F0Distribution {
    pub median_hz: f64,
    pub iqr_hz: f64,
    pub min_hz: f64,
    pub max_hz: f64,
    pub n_frames: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct F0Estimate {
    /// Point estimate; replaced only by octave correction.
    pub f0_hz: f64,
    pub confidence: f64,
    pub frame_f0_hz: Vec<f64>,
    pub frame_confidence: Vec<f64>,
    pub distribution: F0Distribution,
    pub search: F0Search,
    pub notes: Vec<String>,
    pub correction: Option<F0Correction>,
}

/// Run Stage 2 on the selected window.
pub fn run_f0_step(segment: &[f32], sample_rate: u32, cfg: &F0Config) -> Result<F0Estimate, F0Error> {
    if segment.is_empty() {
        return Err(F0Error::EmptyInput);
    }
    let sr = sample_rate as f64;
    let frame_size = ((cfg.frame_s * sr) as usize).max(cfg.min_frame);
    let hop = (frame_size / 4).max(cfg.min_hop);

    let (lmin, lmax) = lag_bounds(sample_rate, frame_size, cfg);
    if sample_rate == 0 || lmax <= lmin {
        return Err(F0Error::Configuration {
            lmin,
            lmax,
            frame_size,
            sample_rate,
            min_hz: cfg.min_hz,
            max_hz: cfg.max_hz,
        });
    }

    let mut notes = Vec::new();
    let mut x: Vec<f64> = segment.iter().map(|&v| v as f64).collect();
    if x.len() < frame_size {
        x.resize(frame_size, 0.0);
        notes.push("short audio; frame was zero-padded for f0 tracking".to_string());
    }

    let window = hann(frame_size);
    let mut acf = FrameAutocorr::new(frame_size);

    let mut f0s = Vec::new();
    let mut confs = Vec::new();
    let mut lags = Vec::new();

    let mut start = 0usize;
    while start + frame_size <= x.len() {
        let mut frame: Vec<f64> = x[start..start + frame_size]
            .iter()
            .zip(&window)
            .map(|(s, w)| s * w)
            .collect();
        let frame_mean = mean(&frame);
        for v in &mut frame {
            *v -= frame_mean;
        }
        start += hop;

        let ac = acf.compute(&frame)?;
        if ac[0] <= 0.0 {
            continue;
        }
        let norm = ac[0] + 1e-12;

        // First maximum wins on exact ties.
        let mut lag = lmin;
        let mut best = f64::NEG_INFINITY;
        for (l, &v) in ac.iter().enumerate().take(lmax).skip(lmin) {
            let v = v / norm;
            if v > best {
                best = v;
                lag = l;
            }
        }

        lags.push(lag as f64);
        f0s.push(sr / lag as f64);
        confs.push(best.clamp(0.0, 1.0));
    }

    if f0s.is_empty() {
        return Err(F0Error::SilentOrDegenerate {
            n_samples: segment.len(),
            frame_size,
        });
    }

    let f0_hz = median(&mut f0s.clone());
    let q1 = quantile(&f0s, 0.25);
    let q3 = quantile(&f0s, 0.75);
    let jitter = 1.0 / (1.0 + variance(&f0s) / f0_hz.max(1e-6));
    let confidence = (0.5 * mean(&confs) + 0.5 * jitter).clamp(0.0, 1.0);
    let median_lag = median(&mut lags) as usize;

    log::debug!(
        "f0 {:.3} Hz from {} frames (lags {}..{}, median lag {}, confidence {:.3})",
        f0_hz,
        f0s.len(),
        lmin,
        lmax,
        median_lag,
        confidence
    );

    Ok(F0Estimate {
        f0_hz,
        confidence,
        distribution: F0Distribution {
            median_hz: f0_hz,
            iqr_hz: q3 - q1,
            min_hz: f0s.iter().copied().fold(f64::INFINITY, f64::min),
            max_hz: f0s.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            n_frames: f0s.len(),
        },
        search: F0Search {
            min_hz: cfg.min_hz,
            max_hz: cfg.max_hz,
            lmin,
            lmax,
            frame_size,
            hop,
            median_lag,
        },
        frame_f0_hz: f0s,
        frame_confidence: confs,
        notes,
        correction: None,
    })
}

/// `(lmin, lmax)` lag bounds for a frame size; the search interval is `[lmin, lmax)`.
pub fn lag_bounds(sample_rate: u32, frame_size: usize, cfg: &F0Config) -> (usize, usize) {
    let sr = sample_rate as f64;
    let lmin = ((sr / cfg.max_hz).floor() as usize).max(1);
    let lmax = ((sr / cfg.min_hz).ceil() as usize).min(frame_size.saturating_sub(1));
    (lmin, lmax)
}

// ------------------------------ Helpers ------------------------------

/// Linear autocorrelation of fixed-size frames through one cached real FFT pair.
struct FrameAutocorr {
    n_fft: usize,
    forward: std::sync::Arc<dyn realfft::RealToComplex<f64>>,
    inverse: std::sync::Arc<dyn realfft::ComplexToReal<f64>>,
    time: Vec<f64>,
    spec: Vec<Complex64>,
}

impl FrameAutocorr {
    fn new(frame_size: usize) -> Self {
        let n_fft = (2 * frame_size).next_power_of_two();
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(n_fft);
        let inverse = planner.plan_fft_inverse(n_fft);
        let time = forward.make_input_vec();
        let spec = forward.make_output_vec();
        Self {
            n_fft,
            forward,
            inverse,
            time,
            spec,
        }
    }

    /// Returns `r[k] = Σ x[i]·x[i+k]` for `k` in `0..frame.len()`.
    fn compute(&mut self, frame: &[f64]) -> Result<Vec<f64>, F0Error> {
        self.time.fill(0.0);
        self.time[..frame.len()].copy_from_slice(frame);
        self.forward
            .process(&mut self.time, &mut self.spec)
            .map_err(|e| F0Error::Fft(e.to_string()))?;
        for c in &mut self.spec {
            *c = Complex64::new(c.norm_sqr(), 0.0);
        }
        self.inverse
            .process(&mut self.spec, &mut self.time)
            .map_err(|e| F0Error::Fft(e.to_string()))?;
        let scale = 1.0 / self.n_fft as f64;
        Ok(self.time[..frame.len()].iter().map(|v| v * scale).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(freq: f64, sr: u32, dur: f64) -> Vec<f32> {
        let n = (sr as f64 * dur) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / sr as f64;
                (0.8 * (2.0 * PI * freq * t).sin()
                    + 0.2 * (2.0 * PI * 2.0 * freq * t).sin()
                    + 0.1 * (2.0 * PI * 3.0 * freq * t).sin()) as f32
            })
            .collect()
    }

    #[test]
    fn autocorr_matches_direct_sum() {
        let frame: Vec<f64> = (0..64).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();
        let mut acf = FrameAutocorr::new(frame.len());
        let fast = acf.compute(&frame).unwrap();
        for lag in [0usize, 1, 5, 63] {
            let direct: f64 = (0..frame.len() - lag).map(|i| frame[i] * frame[i + lag]).sum();
            assert!((fast[lag] - direct).abs() < 1e-9, "lag {lag}");
        }
    }

    #[test]
    fn tracks_a_330_hz_tone() {
        let x = tone(330.0, 48_000, 1.2);
        let est = run_f0_step(&x, 48_000, &F0Config::default()).unwrap();
        assert!((est.f0_hz - 330.0).abs() < 3.0, "got {}", est.f0_hz);
        let m = mean(&est.frame_confidence);
        assert!((0.0..=1.0).contains(&m));
        assert!((0.0..=1.0).contains(&est.confidence));
        assert_eq!(est.search.frame_size, 2208);
        assert_eq!(est.search.hop, 552);
        assert_eq!(est.search.lmin, 24);
        assert_eq!(est.search.lmax, 1200);
        assert_eq!(est.distribution.n_frames, est.frame_f0_hz.len());
    }

    #[test]
    fn degenerate_lag_bounds_are_configuration_errors() {
        let cfg = F0Config {
            min_hz: 1000.0,
            max_hz: 100.0,
            ..Default::default()
        };
        let err = run_f0_step(&[0.1; 4096], 48_000, &cfg).unwrap_err();
        assert!(matches!(err, F0Error::Configuration { .. }));
        assert!(err.to_string().contains("lmin="));
    }

    #[test]
    fn silence_is_reported_not_zero() {
        let err = run_f0_step(&[0.0; 8192], 48_000, &F0Config::default()).unwrap_err();
        assert!(matches!(err, F0Error::SilentOrDegenerate { .. }));
    }

    #[test]
    fn short_input_is_zero_padded() {
        let x = tone(440.0, 48_000, 0.03);
        let est = run_f0_step(&x, 48_000, &F0Config::default()).unwrap();
        assert_eq!(est.distribution.n_frames, 1);
        assert!(est.notes[0].contains("zero-padded"));
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let x = tone(261.63, 48_000, 1.0);
        let a = run_f0_step(&x, 48_000, &F0Config::default()).unwrap();
        let b = run_f0_step(&x, 48_000, &F0Config::default()).unwrap();
        assert_eq!(a.frame_f0_hz, b.frame_f0_hz);
        assert_eq!(a.frame_confidence, b.frame_confidence);
    }
}
