//! Stage 4: Octave correction by harmonic-grid fit
//!
//! The tracker's median f0 can land an octave off (half or double the true fundamental).
//! Three candidates are scored by how many summary peaks sit on their harmonic grid:
//! the preliminary f0, f0/2 and f0×2. The best candidate is chosen by
//! (fit, inside the valid range, smallest shift), then a decision table decides whether
//! to accept it:
//!
//! | candidate is one octave away | fit gain ≥ threshold | inside valid range | decision |
//! |------------------------------|----------------------|--------------------|----------|
//! | no                           | –                    | –                  | keep     |
//! | yes                          | no                   | –                  | keep     |
//! | yes                          | yes                  | no                 | keep     |
//! | yes                          | yes                  | yes                | correct  |

use serde::{Deserialize, Serialize};

use crate::f0::F0Config;
use crate::partials::{SpectralPeak, harmonic_grid_fit};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OctaveConfig {
    /// Relative tolerance for a peak to count as on-grid.
    pub tol: f64,
    /// How many summary peaks are scored.
    pub k_max: usize,
    /// Minimum absolute fit improvement to accept a correction.
    pub min_improvement: f64,
    /// Accepted |log2(candidate / preliminary)| window for "exactly one octave".
    pub octave_log2_min: f64,
    pub octave_log2_max: f64,
}

impl Default for OctaveConfig {
    fn default() -> Self {
        Self {
            tol: 0.03,
            k_max: 12,
            min_improvement: 0.15,
            octave_log2_min: 0.9,
            octave_log2_max: 1.1,
        }
    }
}

/// Record attached to an f0 estimate when a correction is applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct F0Correction {
    pub original_f0_hz: f64,
    pub corrected_f0_hz: f64,
    pub harmonic_fit_before: f64,
    pub harmonic_fit_after: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OctaveShift {
    Unchanged,
    Down,
    Up,
}

impl OctaveShift {
    fn factor(self) -> f64 {
        match self {
            OctaveShift::Unchanged => 1.0,
            OctaveShift::Down => 0.5,
            OctaveShift::Up => 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OctaveCandidate {
    pub shift: OctaveShift,
    pub f0_hz: f64,
    pub fit: f64,
    pub in_range: bool,
    /// |shift| in cents relative to the preliminary f0.
    pub cents_shift: f64,
}

/// Why a best candidate was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepReason {
    NotAnOctave,
    InsufficientImprovement,
    OutOfRange,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OctaveDecision {
    Keep(KeepReason),
    Correct,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OctaveResult {
    /// Final f0: the corrected value when accepted, the preliminary one otherwise.
    pub f0_hz: f64,
    /// Grid fit at the final f0.
    pub harmonic_fit: f64,
    pub correction: Option<F0Correction>,
    pub decision: OctaveDecision,
    /// Candidates in evaluation order: unchanged, down, up.
    pub candidates: [OctaveCandidate; 3],
}

/// Run Stage 4 against the summary peaks computed for `preliminary_f0_hz`.
pub fn run_octave_step(
    preliminary_f0_hz: f64,
    summary_peaks: &[SpectralPeak],
    range: &F0Config,
    cfg: &OctaveConfig,
) -> OctaveResult {
    let candidates = [OctaveShift::Unchanged, OctaveShift::Down, OctaveShift::Up].map(|shift| {
        let f0_hz = preliminary_f0_hz * shift.factor();
        OctaveCandidate {
            shift,
            f0_hz,
            fit: harmonic_grid_fit(summary_peaks, f0_hz, cfg.tol, cfg.k_max),
            in_range: range.in_range(f0_hz),
            cents_shift: (1200.0 * (f0_hz.max(1e-9) / preliminary_f0_hz.max(1e-9)).log2()).abs(),
        }
    });

    let best = best_candidate(&candidates);
    let before = candidates[0];
    let decision = decide(&best, &before, preliminary_f0_hz, cfg);

    let (f0_hz, harmonic_fit, correction) = match decision {
        OctaveDecision::Correct => (
            best.f0_hz,
            best.fit,
            Some(F0Correction {
                original_f0_hz: preliminary_f0_hz,
                corrected_f0_hz: best.f0_hz,
                harmonic_fit_before: before.fit,
                harmonic_fit_after: best.fit,
            }),
        ),
        OctaveDecision::Keep(_) => (preliminary_f0_hz, before.fit, None),
    };

    log::debug!(
        "octave check at {:.3} Hz: fits {:.2}/{:.2}/{:.2} (same/down/up) -> {:?}",
        preliminary_f0_hz,
        candidates[0].fit,
        candidates[1].fit,
        candidates[2].fit,
        decision
    );

    OctaveResult {
        f0_hz,
        harmonic_fit,
        correction,
        decision,
        candidates,
    }
}

/// Highest fit, then in-range, then smallest shift; evaluation order settles exact ties.
fn best_candidate(candidates: &[OctaveCandidate; 3]) -> OctaveCandidate {
    let mut ranked = *candidates;
    ranked.sort_by(|a, b| {
        b.fit
            .total_cmp(&a.fit)
            .then(b.in_range.cmp(&a.in_range))
            .then(a.cents_shift.total_cmp(&b.cents_shift))
    });
    ranked[0]
}

/// The acceptance table from the module docs.
fn decide(
    best: &OctaveCandidate,
    before: &OctaveCandidate,
    preliminary_f0_hz: f64,
    cfg: &OctaveConfig,
) -> OctaveDecision {
    let log2_ratio = (best.f0_hz.max(1e-9) / preliminary_f0_hz.max(1e-9)).log2().abs();
    let is_octave = log2_ratio > cfg.octave_log2_min && log2_ratio < cfg.octave_log2_max;
    let improved = best.fit - before.fit >= cfg.min_improvement;

    match (is_octave, improved, best.in_range) {
        (false, _, _) => OctaveDecision::Keep(KeepReason::NotAnOctave),
        (true, false, _) => OctaveDecision::Keep(KeepReason::InsufficientImprovement),
        (true, true, false) => OctaveDecision::Keep(KeepReason::OutOfRange),
        (true, true, true) => OctaveDecision::Correct,
    }
}
