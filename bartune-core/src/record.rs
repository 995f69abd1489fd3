//! Per-bar output record.
//!
//! [`BarRecord`] is the unit of the dataset: everything measured for one bar plus the
//! metadata handed in by the caller. Field names are the serialized names.

use serde::{Deserialize, Serialize};

use crate::f0::{F0Distribution, F0Search};
use crate::intervals::IntervalResult;
use crate::octave::F0Correction;
use crate::partials::{PeakSource, SpectralPeak};
use crate::tuning::{EdoInterpretation, Register};

/// Identifier of the f0 method recorded with every estimate.
pub const F0_METHOD: &str = "acf_median_tracker_v1";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start_s: f64,
    pub end_s: f64,
}

impl TimeSpan {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checksums {
    pub audio_sha256: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub audio_path: String,
    pub youtube_url: Option<String>,
    pub spectrogram_path: Option<String>,
    pub checksums: Checksums,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub measured_by: String,
    pub measured_at: String,
    pub room: String,
    pub mic: String,
    pub mallet: String,
    pub notes: String,
    pub method_version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub date: String,
    pub by: String,
    pub change: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub audio: String,
    pub spectrogram: String,
    pub metadata: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            audio: "TBD".into(),
            spectrogram: "TBD".into(),
            metadata: "TBD".into(),
        }
    }
}

/// Caller-supplied fields copied verbatim into the record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BarMetadata {
    pub label_index_mod: Option<i64>,
    pub source_filename: String,
    pub source_path: String,
    pub media: Media,
    pub provenance: Provenance,
    pub revision_history: Vec<Revision>,
    pub license: License,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct F0Measurement {
    pub f0_hz: f64,
    pub f0_method: String,
    pub f0_confidence: f64,
    /// Caveats joined with "; ", empty when there are none.
    pub f0_confidence_notes: String,
    pub f0_search: F0Search,
    pub f0_corrections: Option<F0Correction>,
    pub harmonic_grid_fit: f64,
    pub f0_window: TimeSpan,
    pub f0_distribution: F0Distribution,
    pub frame_f0_hz: Vec<f64>,
    pub frame_confidence: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialsMeasurement {
    pub analysis_window: TimeSpan,
    pub fft_size: usize,
    pub peak_source: PeakSource,
    pub peaks: Vec<SpectralPeak>,
    pub summary_peaks: Vec<SpectralPeak>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub sample_rate_hz: u32,
    pub f0: F0Measurement,
    pub partials: PartialsMeasurement,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub bar_id: String,
    pub instrument_id: String,
    pub position_index: i64,
    pub label_index_mod: Option<i64>,
    pub source_filename: String,
    pub source_path: String,
    pub media: Media,
    pub measurements: Measurements,
    pub register: Register,
    pub edo_interpretation: Option<EdoInterpretation>,
    pub ji: IntervalResult,
    /// 1-based position after the corpus-wide sort.
    pub global_order_index: usize,
    pub provenance: Provenance,
    pub revision_history: Vec<Revision>,
    pub license: License,
}

impl BarRecord {
    pub fn f0_hz(&self) -> f64 {
        self.measurements.f0.f0_hz
    }
}

/// Corpus reference: the bar with the lowest finalized f0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub bar_id: String,
    pub f_ref_hz_measured: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub n_bars: usize,
    pub n_instruments: usize,
    /// Sum of analysis-window durations (s).
    pub total_duration_s: f64,
    pub warnings: Vec<String>,
}
