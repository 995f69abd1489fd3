//! Stage 6: Quality control
//!
//! A read-only pass over finalized [`BarRecord`]s that flags likely estimation failures.
//! Nothing here changes a record; every flag is derived from fields already in it.
//!
//! Heuristics (configurable):
//! - Low confidence: f0 confidence < `min_confidence`
//! - Unstable f0: IQR / f0 > `max_rel_iqr`
//! - Too few peaks: summary peaks < `min_summary_peaks`
//! - Range boundary: f0 within `boundary_rel` of the search range ends, or the median ACF
//!   lag within `boundary_lag` samples of its search bounds
//! - Grid mismatch: harmonic-grid fit at the final f0 < `min_grid_fit`
//! - Loudest peak off-grid: top summary peak not within `harmonic_tol` of a multiple of f0
//! - Suspicious octave: a correction was applied, or the fit is weak and an octave switch
//!   would gain ≥ `octave_help`, or a switch would gain ≥ `octave_help_strong` regardless
//! - Fallback peaks: the peak list came from the raw-magnitude fallback

use serde::{Deserialize, Serialize};

use crate::common::nearest_harmonic;
use crate::partials::{PeakSource, harmonic_grid_fit};
use crate::record::BarRecord;

/// Thresholds for the QC flags.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_confidence: f64,
    /// Relative IQR (IQR / f0) above which the estimate is unstable.
    pub max_rel_iqr: f64,
    pub min_summary_peaks: usize,
    /// Relative distance to a range bound that counts as "at" it.
    pub boundary_rel: f64,
    /// Lag distance (samples) to `lmin`/`lmax` that counts as "at" it.
    pub boundary_lag: usize,
    pub min_grid_fit: f64,
    /// Tolerance for both the grid fits and the loudest-peak check.
    pub harmonic_tol: f64,
    /// Summary peaks scored by the grid fits.
    pub grid_k_max: usize,
    pub octave_help: f64,
    pub octave_help_strong: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_rel_iqr: 0.01,
            min_summary_peaks: 5,
            boundary_rel: 0.02,
            boundary_lag: 1,
            min_grid_fit: 0.45,
            harmonic_tol: 0.03,
            grid_k_max: 12,
            octave_help: 0.15,
            octave_help_strong: 0.20,
        }
    }
}

/// Per-bar flags and notes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcEntry {
    pub bar_id: String,
    pub low_confidence: bool,
    pub unstable_f0: bool,
    pub suspicious_octave: bool,
    pub too_few_peaks: bool,
    pub f0_at_range_boundary: bool,
    pub harmonic_grid_mismatch: bool,
    pub high_peak_not_near_harmonic: bool,
    pub fallback_peaks: bool,
    /// Short explanations joined with "; ".
    pub notes: String,
}

impl QcEntry {
    pub fn is_flagged(&self) -> bool {
        self.low_confidence
            || self.unstable_f0
            || self.suspicious_octave
            || self.too_few_peaks
            || self.f0_at_range_boundary
            || self.harmonic_grid_mismatch
            || self.high_peak_not_near_harmonic
            || self.fallback_peaks
    }
}

/// Run the QC pass for one finalized record.
pub fn run_quality_step(bar: &BarRecord, cfg: &QualityConfig) -> QcEntry {
    let f0m = &bar.measurements.f0;
    let partials = &bar.measurements.partials;
    let summary = &partials.summary_peaks;
    let f0 = f0m.f0_hz;

    let unstable_f0 = f0m.f0_distribution.iqr_hz / f0m.f0_distribution.median_hz.max(1e-6) > cfg.max_rel_iqr;
    let too_few_peaks = summary.len() < cfg.min_summary_peaks;

    let fit = |hz: f64| harmonic_grid_fit(summary, hz, cfg.harmonic_tol, cfg.grid_k_max);
    let fit_now = fit(f0);
    let octave_gain = fit(f0 / 2.0).max(fit(f0 * 2.0)) - fit_now;
    let harmonic_grid_mismatch = fit_now < cfg.min_grid_fit;
    let suspicious_octave = f0m.f0_corrections.is_some()
        || (harmonic_grid_mismatch && octave_gain >= cfg.octave_help)
        || octave_gain >= cfg.octave_help_strong;

    let high_peak_not_near_harmonic = summary.first().is_some_and(|peak| {
        nearest_harmonic(peak.hz, f0.max(1e-9)).is_none_or(|(_, dev)| dev > cfg.harmonic_tol)
    });

    let search = &f0m.f0_search;
    let near = |bound: f64| bound > 0.0 && (f0 - bound).abs() / bound <= cfg.boundary_rel;
    let hz_near_boundary = near(search.min_hz) || near(search.max_hz);
    let lag_near_boundary = (search.lmin > 0 && search.median_lag <= search.lmin + cfg.boundary_lag)
        || (search.lmax > 0 && search.median_lag + cfg.boundary_lag >= search.lmax);
    let f0_at_range_boundary = hz_near_boundary || lag_near_boundary;

    let fallback_peaks = partials.peak_source == PeakSource::TopMagnitudeFallback;

    let notes: Vec<&str> = [
        (unstable_f0, "high relative f0 IQR"),
        (too_few_peaks, "low partial count"),
        (f0_at_range_boundary, "f0 near configured range boundary"),
        (harmonic_grid_mismatch, "weak harmonic grid alignment"),
        (fallback_peaks, "peaks from magnitude fallback"),
    ]
    .into_iter()
    .filter_map(|(on, note)| on.then_some(note))
    .collect();

    let entry = QcEntry {
        bar_id: bar.bar_id.clone(),
        low_confidence: f0m.f0_confidence < cfg.min_confidence,
        unstable_f0,
        suspicious_octave,
        too_few_peaks,
        f0_at_range_boundary,
        harmonic_grid_mismatch,
        high_peak_not_near_harmonic,
        fallback_peaks,
        notes: notes.join("; "),
    };
    if entry.is_flagged() {
        log::debug!("qc {}: {:?}", entry.bar_id, entry);
    }
    entry
}
