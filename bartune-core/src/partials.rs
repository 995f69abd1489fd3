//! Stage 3: Spectral partial extraction
//!
//! - One Hann-windowed real FFT over the whole analysis window, zero-padded or truncated
//!   to a power of two (capped).
//! - Magnitudes in dB over bins at or above `min_hz`; levels are reported relative to the
//!   loudest such bin.
//! - Peaks are local maxima (flat tops resolve to their middle bin) whose topographic
//!   prominence reaches `prominence_db`. Prominence follows the usual definition: walk out
//!   on each side until a higher sample or the edge, take the lowest point of each walk,
//!   and measure the peak against the higher of the two.
//! - When nothing is prominent enough, the loudest bins stand in for peaks and the result
//!   is tagged [`PeakSource::TopMagnitudeFallback`].

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{hann, nearest_harmonic};

#[derive(Debug, Error)]
pub enum PartialsError {
    #[error("empty segment: no spectrum to analyze")]
    EmptyInput,
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("FFT error: {0}")]
    Fft(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PartialsConfig {
    /// Upper bound on the FFT length (samples, power of two).
    pub max_fft: usize,
    /// Bins below this frequency are ignored (Hz).
    pub min_hz: f64,
    /// Minimum topographic prominence for a peak (dB).
    pub prominence_db: f64,
    /// Cap on the full peak list.
    pub max_peaks: usize,
    /// Length of the summary prefix.
    pub summary_peaks: usize,
    /// Relative tolerance for tagging a peak with a harmonic index.
    pub harmonic_tol: f64,
}

impl Default for PartialsConfig {
    fn default() -> Self {
        Self {
            max_fft: 262_144,
            min_hz: 20.0,
            prominence_db: 15.0,
            max_peaks: 60,
            summary_peaks: 12,
            harmonic_tol: 0.03,
        }
    }
}

/// Where a peak list came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakSource {
    /// Local maxima that cleared the prominence threshold.
    Prominence,
    /// Loudest raw bins, used because no local maximum was prominent enough.
    TopMagnitudeFallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    pub hz: f64,
    /// Level relative to the loudest valid bin (dB, ≤ 0).
    pub rel_amp_db: f64,
    pub peak_confidence: f64,
    pub harmonic_index_guess: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartialsResult {
    /// Sorted by descending magnitude, at most `max_peaks`.
    pub peaks: Vec<SpectralPeak>,
    /// Prefix of `peaks`, at most `summary_peaks`.
    pub summary_peaks: Vec<SpectralPeak>,
    pub source: PeakSource,
    pub fft_size: usize,
}

/// Run Stage 3 on a waveform segment against a candidate fundamental.
pub fn run_partials_step(
    segment: &[f32],
    sample_rate: u32,
    f0_hz: f64,
    cfg: &PartialsConfig,
) -> Result<PartialsResult, PartialsError> {
    if segment.is_empty() {
        return Err(PartialsError::EmptyInput);
    }
    if sample_rate == 0 {
        return Err(PartialsError::InvalidSampleRate(sample_rate));
    }
    let sr = sample_rate as f64;

    let fft_n = segment.len().max(2).next_power_of_two().min(cfg.max_fft);
    let window = hann(fft_n);

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(fft_n);
    let mut input = r2c.make_input_vec();
    for (i, (slot, w)) in input.iter_mut().zip(&window).enumerate() {
        *slot = segment.get(i).map_or(0.0, |&s| s as f64) * w;
    }
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut input, &mut spectrum)
        .map_err(|e| PartialsError::Fft(e.to_string()))?;

    // Valid bins only: frequency ≥ min_hz.
    let df = sr / fft_n as f64;
    let first_valid = (0..spectrum.len())
        .find(|&k| k as f64 * df >= cfg.min_hz)
        .unwrap_or(spectrum.len());
    let freqs: Vec<f64> = (first_valid..spectrum.len()).map(|k| k as f64 * df).collect();
    let mag: Vec<f64> = spectrum[first_valid..].iter().map(|c| c.norm()).collect();
    if mag.is_empty() {
        return Ok(PartialsResult {
            peaks: vec![],
            summary_peaks: vec![],
            source: PeakSource::Prominence,
            fft_size: fft_n,
        });
    }
    let mag_db: Vec<f64> = mag.iter().map(|m| 20.0 * m.max(1e-12).log10()).collect();

    let mut candidates: Vec<(usize, f64)> = local_maxima(&mag_db)
        .into_iter()
        .map(|i| (i, prominence(&mag_db, i)))
        .filter(|&(_, p)| p >= cfg.prominence_db)
        .map(|(i, p)| (i, (p / (2.0 * cfg.prominence_db)).clamp(0.0, 1.0)))
        .collect();

    let source = if candidates.is_empty() {
        candidates = top_magnitude_bins(&mag, cfg.max_peaks)
            .into_iter()
            .map(|i| (i, 1.0))
            .collect();
        log::debug!(
            "no peak reached {:.1} dB prominence; using {} loudest bins",
            cfg.prominence_db,
            candidates.len()
        );
        PeakSource::TopMagnitudeFallback
    } else {
        PeakSource::Prominence
    };

    // Loudest first; equal levels keep ascending frequency.
    candidates.sort_by(|a, b| mag_db[b.0].total_cmp(&mag_db[a.0]).then(a.0.cmp(&b.0)));
    candidates.truncate(cfg.max_peaks);

    let amp_max = mag_db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let peaks: Vec<SpectralPeak> = candidates
        .into_iter()
        .map(|(i, confidence)| {
            let hz = freqs[i];
            let harmonic_index_guess = nearest_harmonic(hz, f0_hz.max(1e-6))
                .filter(|&(_, dev)| dev <= cfg.harmonic_tol)
                .map(|(k, _)| k);
            SpectralPeak {
                hz,
                rel_amp_db: mag_db[i] - amp_max,
                peak_confidence: confidence,
                harmonic_index_guess,
            }
        })
        .collect();
    let summary_peaks = peaks.iter().take(cfg.summary_peaks).cloned().collect();

    log::debug!(
        "partials: fft {} ({:.3} Hz/bin), {} peaks via {:?}",
        fft_n,
        df,
        peaks.len(),
        source
    );

    Ok(PartialsResult {
        peaks,
        summary_peaks,
        source,
        fft_size: fft_n,
    })
}

/// Fraction of the first `k_max` peaks lying within `tol` (relative) of a positive
/// integer multiple of `f0_hz`. Zero for an empty list or a non-positive f0.
pub fn harmonic_grid_fit(peaks: &[SpectralPeak], f0_hz: f64, tol: f64, k_max: usize) -> f64 {
    if peaks.is_empty() || f0_hz <= 0.0 {
        return 0.0;
    }
    let k = k_max.min(peaks.len());
    let aligned = peaks[..k]
        .iter()
        .filter(|p| nearest_harmonic(p.hz, f0_hz).is_some_and(|(_, dev)| dev <= tol))
        .count();
    aligned as f64 / k.max(1) as f64
}

// ------------------------------ Helpers ------------------------------

/// Indices of strict local maxima; a flat top counts once, at its middle sample.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    if x.len() < 3 {
        return out;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                out.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    out
}

/// Topographic prominence of the peak at `peak`.
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if x[i] > height {
            break;
        }
        left_min = left_min.min(x[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    for &v in &x[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Indices of the `n` largest magnitudes (ties broken toward lower bins).
fn top_magnitude_bins(mag: &[f64], n: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..mag.len()).collect();
    idx.sort_by(|&a, &b| mag[b].total_cmp(&mag[a]).then(a.cmp(&b)));
    idx.truncate(n.min(mag.len()));
    idx
}
