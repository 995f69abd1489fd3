//! Stage 1: Stable-window selection
//!
//! Skips the mallet attack, then slides a window (stepped by one RMS frame) over the
//! remaining signal and keeps the position whose short-time RMS envelope varies least.
//! Short recordings shrink the window instead of failing; the caveat is reported as a note.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::variance;
use crate::input::Waveform;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("empty waveform: nothing to select a window from")]
    EmptyInput,
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Lead-in skipped to avoid the attack transient (s).
    pub ignore_s: f64,
    /// Preferred window length (s).
    pub target_s: f64,
    /// Floor for the window length, relaxed when the signal is shorter (s).
    pub min_s: f64,
    /// Non-overlapping RMS frame length, also the search step (s).
    pub rms_frame_s: f64,
    /// Recordings shorter than this get a "short audio" note (s).
    pub short_audio_s: f64,
    /// Variances closer than this are ties; ties go to the later window.
    pub tie_eps: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            ignore_s: 0.20,
            target_s: 1.00,
            min_s: 0.40,
            rms_frame_s: 0.05,
            short_audio_s: 1.2,
            tie_eps: 1e-12,
        }
    }
}

/// Half-open sample range `[start_sample, end_sample)` into a waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start_sample: usize,
    pub end_sample: usize,
}

impl AnalysisWindow {
    pub fn len(&self) -> usize {
        self.end_sample.saturating_sub(self.start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_s(&self, sample_rate: u32) -> f64 {
        self.start_sample as f64 / sample_rate as f64
    }

    pub fn end_s(&self, sample_rate: u32) -> f64 {
        self.end_sample as f64 / sample_rate as f64
    }

    pub fn duration_s(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }
}

#[derive(Clone, Debug)]
pub struct WindowResult {
    pub window: AnalysisWindow,
    /// Human-readable caveat when a fallback branch was taken.
    pub note: Option<String>,
}

/// Run Stage 1 on a decoded waveform.
pub fn run_window_step(wave: &Waveform, cfg: &WindowConfig) -> Result<WindowResult, WindowError> {
    if wave.is_empty() {
        return Err(WindowError::EmptyInput);
    }
    let sr = wave.sample_rate();
    if sr == 0 {
        return Err(WindowError::InvalidSampleRate(sr));
    }
    let sr_f = sr as f64;
    let x = wave.samples();
    let n = x.len();

    let start_idx = ((cfg.ignore_s * sr_f) as usize).min(n);
    let max_win = (cfg.target_s * sr_f) as usize;
    let min_win = (cfg.min_s * sr_f) as usize;

    let available = n - start_idx;
    if available == 0 {
        log::warn!("audio shorter than the {:.2} s lead-in; using full signal", cfg.ignore_s);
        return Ok(WindowResult {
            window: AnalysisWindow {
                start_sample: 0,
                end_sample: n,
            },
            note: Some("audio shorter than ignore lead-in; using full signal".into()),
        });
    }

    let mut win = max_win.min(available);
    if win < min_win {
        win = min_win.max(available);
    }
    win = win.min(available);

    let frame = ((cfg.rms_frame_s * sr_f) as usize).max(1);
    let mut best_start = start_idx;
    let mut best_var: Option<f64> = None;

    let mut s = start_idx;
    while s + win <= n {
        if let Some(var) = rms_envelope_variance(&x[s..s + win], frame) {
            let better = match best_var {
                None => true,
                Some(best) => {
                    var < best - cfg.tie_eps || ((var - best).abs() < cfg.tie_eps && s > best_start)
                }
            };
            if better {
                best_var = Some(var);
                best_start = s;
            }
        }
        s += frame;
    }

    let note = (wave.duration_s() < cfg.short_audio_s)
        .then(|| "short audio; analysis window reduced".to_string());
    if note.is_some() {
        log::warn!("short audio ({:.3} s); window reduced to {} samples", wave.duration_s(), win);
    }
    log::debug!(
        "stable window [{}, {}) of {} samples (rms variance {:?})",
        best_start,
        best_start + win,
        n,
        best_var
    );

    Ok(WindowResult {
        window: AnalysisWindow {
            start_sample: best_start,
            end_sample: best_start + win,
        },
        note,
    })
}

/// Variance of per-frame RMS over the whole frames of `segment`; `None` if no whole frame fits.
fn rms_envelope_variance(segment: &[f32], frame: usize) -> Option<f64> {
    let rms: Vec<f64> = segment
        .chunks_exact(frame)
        .map(|chunk| {
            let power = chunk.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / frame as f64;
            (power + 1e-12).sqrt()
        })
        .collect();
    if rms.is_empty() {
        None
    } else {
        Some(variance(&rms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(samples: Vec<f32>, sr: u32) -> Waveform {
        Waveform::new(samples, sr)
    }

    #[test]
    fn empty_is_an_error() {
        let err = run_window_step(&wave(vec![], 48_000), &WindowConfig::default()).unwrap_err();
        assert!(matches!(err, WindowError::EmptyInput));
    }

    #[test]
    fn shorter_than_lead_in_uses_full_signal() {
        let r = run_window_step(&wave(vec![0.1; 100], 1000), &WindowConfig::default()).unwrap();
        assert_eq!(r.window, AnalysisWindow { start_sample: 0, end_sample: 100 });
        assert!(r.note.unwrap().contains("full signal"));
    }

    #[test]
    fn long_constant_signal_takes_latest_tie() {
        // 3 s of constant amplitude: every candidate has zero variance.
        let sr = 1000;
        let r = run_window_step(&wave(vec![0.5; 3000], sr), &WindowConfig::default()).unwrap();
        assert_eq!(r.window.len(), 1000);
        // Last start on the 50-sample grid from 200 with room for 1000 samples.
        assert_eq!(r.window.start_sample, 2000);
        assert!(r.note.is_none());
    }

    #[test]
    fn short_audio_shrinks_window() {
        let sr = 1000;
        let r = run_window_step(&wave(vec![0.5; 500], sr), &WindowConfig::default()).unwrap();
        assert_eq!(r.window, AnalysisWindow { start_sample: 200, end_sample: 500 });
        assert!(r.note.unwrap().starts_with("short audio"));
    }

    #[test]
    fn prefers_the_steady_region() {
        // Loud burst then steady decay-free tail: the steady tail must win.
        let sr = 1000;
        let mut x = vec![0.0f32; 3000];
        for (i, v) in x.iter_mut().enumerate() {
            let amp = if i < 1500 { ((i / 50) % 2) as f32 } else { 0.3 };
            *v = amp * if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        let r = run_window_step(&wave(x, sr), &WindowConfig::default()).unwrap();
        assert!(r.window.start_sample >= 1500);
    }
}
