//! Stage 5a: Register and EDO interpretation
//!
//! Placement of a finalized f0 relative to the corpus reference:
//! - `octave_abs = floor(log2(f0 / f_ref))`
//! - `within_octave_ratio = f0 / (f_ref · 2^octave_abs)`, kept in `[1, 2)`
//!
//! Instruments named `edo<N>` are read as N equal divisions of the octave and get the
//! nearest step with its cents error; every other instrument has no EDO reading.

use serde::{Deserialize, Serialize};

use crate::common::ratio_to_cents;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub octave_abs: i32,
    pub within_octave_ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdoInterpretation {
    pub edo: u32,
    pub step: i64,
    pub octave: i32,
    pub target_ratio: f64,
    pub cents_error_from_target: f64,
}

/// Divisions of the octave for an EDO-family instrument id (`"edo5"` → 5).
pub fn edo_divisions(instrument_id: &str) -> Option<u32> {
    instrument_id
        .strip_prefix("edo")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|&n| n > 0)
}

/// Octave and within-octave ratio of `f0_hz` above `f_ref_hz`.
///
/// Floating rounding in `log2` can leave the ratio a hair outside `[1, 2)`; the octave
/// is nudged so the ratio always lands inside.
pub fn register(f0_hz: f64, f_ref_hz: f64) -> Register {
    let mut octave_abs = (f0_hz / f_ref_hz).log2().floor() as i32;
    let mut within = f0_hz / (f_ref_hz * 2f64.powi(octave_abs));
    if within >= 2.0 {
        octave_abs += 1;
        within = f0_hz / (f_ref_hz * 2f64.powi(octave_abs));
    } else if within < 1.0 {
        octave_abs -= 1;
        within = f0_hz / (f_ref_hz * 2f64.powi(octave_abs));
    }
    Register {
        octave_abs,
        within_octave_ratio: within.clamp(1.0, 2.0f64.next_down()),
    }
}

/// Nearest step of an N-EDO scale for a register placement.
pub fn edo_interpretation(edo: u32, reg: &Register) -> EdoInterpretation {
    let n = edo as f64;
    // Half steps round to even.
    let step = (n * reg.within_octave_ratio.log2()).round_ties_even() as i64;
    let target_ratio = (step as f64 / n).exp2();
    EdoInterpretation {
        edo,
        step,
        octave: reg.octave_abs,
        target_ratio,
        cents_error_from_target: ratio_to_cents(reg.within_octave_ratio / target_ratio),
    }
}
