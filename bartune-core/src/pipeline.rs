//! Two-phase corpus pipeline.
//!
//! Phase 1 ([`analyze_bar`], [`analyze_bars`]) runs stages 1–4 on each bar in
//! isolation: window, f0, preliminary partials, octave correction, final partials.
//! Bars share no state, so phase 1 may run on the rayon pool.
//!
//! The reduction ([`select_reference`]) sorts the bars by (f0, instrument, position) and
//! takes the lowest f0 as the corpus reference.
//!
//! Phase 2 ([`finalize_corpus`]) receives that reference explicitly and assigns
//! register, EDO, JI and QC to every bar.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::diagnostics::{QcEntry, run_quality_step};
use crate::f0::{F0Error, F0Estimate, run_f0_step};
use crate::input::{InputError, Waveform};
use crate::intervals::run_interval_step;
use crate::octave::run_octave_step;
use crate::partials::{PartialsError, PartialsResult, run_partials_step};
use crate::record::{
    BarMetadata, BarRecord, BuildStats, F0_METHOD, F0Measurement, Measurements,
    PartialsMeasurement, Reference, TimeSpan,
};
use crate::tuning::{edo_divisions, edo_interpretation, register};
use crate::window::{WindowError, WindowResult, run_window_step};

/// Stage at which a bar failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Window,
    F0,
    Partials,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decode => "decode",
            Stage::Window => "window selection",
            Stage::F0 => "f0 tracking",
            Stage::Partials => "partial analysis",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    F0(#[from] F0Error),
    #[error(transparent)]
    Partials(#[from] PartialsError),
}

/// A stage failure for one bar. Fatal for that bar only.
#[derive(Debug, Error)]
#[error("bar {bar_id}: {stage} failed: {source}")]
pub struct BarError {
    pub bar_id: String,
    pub stage: Stage,
    pub source: StageError,
}

impl BarError {
    fn new(bar_id: &str, stage: Stage, source: impl Into<StageError>) -> Self {
        Self {
            bar_id: bar_id.to_string(),
            stage,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no bars to finalize")]
    EmptyCorpus,
    #[error("duplicate bar_id: {0}")]
    DuplicateBarId(String),
}

/// Identity and caller metadata for one bar.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BarInput {
    pub bar_id: String,
    pub instrument_id: String,
    pub position_index: i64,
    /// Where the position came from, carried into the f0 notes.
    pub position_note: Option<String>,
    pub metadata: BarMetadata,
}

/// Phase-1 output for one bar.
#[derive(Clone, Debug)]
pub struct BarAnalysis {
    pub input: BarInput,
    pub sample_rate: u32,
    pub window: WindowResult,
    /// Final estimate: `f0_hz` and `correction` reflect octave correction.
    pub estimate: F0Estimate,
    pub preliminary_f0_hz: f64,
    /// Harmonic-grid fit at the final f0.
    pub harmonic_fit: f64,
    /// Partials against the final f0.
    pub partials: PartialsResult,
}

impl BarAnalysis {
    pub fn f0_hz(&self) -> f64 {
        self.estimate.f0_hz
    }
}

/// Everything phase 2 produces for a corpus.
#[derive(Clone, Debug, Serialize)]
pub struct CorpusSummary {
    pub reference: Reference,
    /// Sorted by `global_order_index`.
    pub bars: Vec<BarRecord>,
    /// Same order as `bars`.
    pub qc: Vec<QcEntry>,
    pub build_stats: BuildStats,
}

/// Phase 1 for a single decoded bar.
pub fn analyze_bar(input: BarInput, wave: &Waveform, cfg: &AnalysisConfig) -> Result<BarAnalysis, BarError> {
    let bar_id = input.bar_id.as_str();
    let sr = wave.sample_rate();

    let window = run_window_step(wave, &cfg.window)
        .map_err(|e| BarError::new(bar_id, Stage::Window, e))?;
    let segment = wave.segment(window.window.start_sample, window.window.end_sample);

    let mut estimate =
        run_f0_step(segment, sr, &cfg.f0).map_err(|e| BarError::new(bar_id, Stage::F0, e))?;
    let preliminary_f0_hz = estimate.f0_hz;

    let preliminary = run_partials_step(segment, sr, preliminary_f0_hz, &cfg.partials)
        .map_err(|e| BarError::new(bar_id, Stage::Partials, e))?;
    let octave = run_octave_step(preliminary_f0_hz, &preliminary.summary_peaks, &cfg.f0, &cfg.octave);

    estimate.f0_hz = octave.f0_hz;
    estimate.correction = octave.correction;

    // Harmonic tags depend on f0; an unchanged f0 gives the same partials again.
    let partials = if estimate.correction.is_some() {
        run_partials_step(segment, sr, estimate.f0_hz, &cfg.partials)
            .map_err(|e| BarError::new(bar_id, Stage::Partials, e))?
    } else {
        preliminary
    };

    log::debug!(
        "{}: f0 {:.3} Hz (preliminary {:.3}), {} peaks",
        bar_id,
        estimate.f0_hz,
        preliminary_f0_hz,
        partials.peaks.len()
    );

    Ok(BarAnalysis {
        input,
        sample_rate: sr,
        window,
        estimate,
        preliminary_f0_hz,
        harmonic_fit: octave.harmonic_fit,
        partials,
    })
}

/// Phase 1 for many bars; `load` decodes the waveform for a bar.
///
/// Results keep the order of `inputs`. With `cfg.parallel` the bars run on the rayon pool.
pub fn analyze_bars<F>(inputs: Vec<BarInput>, load: F, cfg: &AnalysisConfig) -> Vec<Result<BarAnalysis, BarError>>
where
    F: Fn(&BarInput) -> Result<Waveform, InputError> + Sync,
{
    let run = |input: BarInput| {
        let wave = load(&input).map_err(|e| BarError::new(&input.bar_id, Stage::Decode, e))?;
        analyze_bar(input, &wave, cfg)
    };
    if cfg.parallel {
        inputs.into_par_iter().map(run).collect()
    } else {
        inputs.into_iter().map(run).collect()
    }
}

/// Corpus order: f0, then instrument id, then position, then bar id.
fn corpus_order(a: &BarAnalysis, b: &BarAnalysis) -> Ordering {
    a.f0_hz()
        .total_cmp(&b.f0_hz())
        .then_with(|| a.input.instrument_id.cmp(&b.input.instrument_id))
        .then_with(|| a.input.position_index.cmp(&b.input.position_index))
        .then_with(|| a.input.bar_id.cmp(&b.input.bar_id))
}

/// The reduction: the bar with the lowest f0 in corpus order.
pub fn select_reference(bars: &[BarAnalysis]) -> Option<Reference> {
    bars.iter().min_by(|a, b| corpus_order(a, b)).map(|bar| Reference {
        bar_id: bar.input.bar_id.clone(),
        f_ref_hz_measured: bar.f0_hz(),
    })
}

/// Phase 2: sort, pick the reference and assign register, EDO, JI and QC.
pub fn finalize_corpus(mut bars: Vec<BarAnalysis>, cfg: &AnalysisConfig) -> Result<CorpusSummary, PipelineError> {
    let mut seen = BTreeSet::new();
    for bar in &bars {
        if !seen.insert(bar.input.bar_id.as_str()) {
            return Err(PipelineError::DuplicateBarId(bar.input.bar_id.clone()));
        }
    }

    bars.sort_by(corpus_order);
    let reference = select_reference(&bars).ok_or(PipelineError::EmptyCorpus)?;
    log::info!(
        "reference f0 {:.3} Hz from {} ({} bars)",
        reference.f_ref_hz_measured,
        reference.bar_id,
        bars.len()
    );

    let build_stats = BuildStats {
        n_bars: bars.len(),
        n_instruments: bars
            .iter()
            .map(|b| b.input.instrument_id.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
        total_duration_s: bars
            .iter()
            .map(|b| b.window.window.duration_s(b.sample_rate))
            .sum(),
        warnings: Vec::new(),
    };

    let records: Vec<BarRecord> = bars
        .into_iter()
        .enumerate()
        .map(|(i, bar)| build_record(bar, i + 1, reference.f_ref_hz_measured, cfg))
        .collect();
    let qc = records
        .iter()
        .map(|r| run_quality_step(r, &cfg.quality))
        .collect::<Vec<_>>();

    let flagged = qc.iter().filter(|e| e.is_flagged()).count();
    if flagged > 0 {
        log::info!("{flagged} of {} bars carry QC flags", qc.len());
    }

    Ok(CorpusSummary {
        reference,
        bars: records,
        qc,
        build_stats,
    })
}

fn build_record(bar: BarAnalysis, global_order_index: usize, f_ref_hz: f64, cfg: &AnalysisConfig) -> BarRecord {
    let BarAnalysis {
        input,
        sample_rate,
        window,
        estimate,
        preliminary_f0_hz,
        harmonic_fit,
        partials,
    } = bar;
    let f0_hz = estimate.f0_hz;

    let reg = register(f0_hz, f_ref_hz);
    let edo = edo_divisions(&input.instrument_id).map(|n| edo_interpretation(n, &reg));
    let ji = run_interval_step(f0_hz / f_ref_hz, &cfg.intervals);

    let octave_note = estimate.correction.as_ref().map(|c| {
        format!(
            "octave-corrected: {:.3}->{:.3} (harmonic fit {:.2}->{:.2})",
            preliminary_f0_hz, c.corrected_f0_hz, c.harmonic_fit_before, c.harmonic_fit_after
        )
    });
    let notes: Vec<String> = window
        .note
        .into_iter()
        .chain(input.position_note)
        .chain(estimate.notes)
        .chain(octave_note)
        .filter(|n| !n.is_empty())
        .collect();

    let span = TimeSpan {
        start_s: window.window.start_s(sample_rate),
        end_s: window.window.end_s(sample_rate),
    };
    let mut distribution = estimate.distribution;
    distribution.median_hz = f0_hz;

    let meta = input.metadata;
    BarRecord {
        bar_id: input.bar_id,
        instrument_id: input.instrument_id,
        position_index: input.position_index,
        label_index_mod: meta.label_index_mod,
        source_filename: meta.source_filename,
        source_path: meta.source_path,
        media: meta.media,
        measurements: Measurements {
            sample_rate_hz: sample_rate,
            f0: F0Measurement {
                f0_hz,
                f0_method: F0_METHOD.to_string(),
                f0_confidence: estimate.confidence,
                f0_confidence_notes: notes.join("; "),
                f0_search: estimate.search,
                f0_corrections: estimate.correction,
                harmonic_grid_fit: harmonic_fit,
                f0_window: span,
                f0_distribution: distribution,
                frame_f0_hz: estimate.frame_f0_hz,
                frame_confidence: estimate.frame_confidence,
            },
            partials: PartialsMeasurement {
                analysis_window: span,
                fft_size: partials.fft_size,
                peak_source: partials.source,
                peaks: partials.peaks,
                summary_peaks: partials.summary_peaks,
            },
        },
        register: reg,
        edo_interpretation: edo,
        ji,
        global_order_index,
        provenance: meta.provenance,
        revision_history: meta.revision_history,
        license: meta.license,
    }
}
