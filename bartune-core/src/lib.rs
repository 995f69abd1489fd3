//! # bartune-core
//!
//! Acoustic measurement of tuned percussion bars: one record per recorded bar with a
//! fundamental estimate, spectral partials, octave placement against the corpus, an
//! equal-division (EDO) reading and ranked just-intonation candidates, plus QC flags.
//!
//! ## Stages
//!
//! 1. [`window`]: most stable sub-interval after the attack
//! 2. [`f0`]: frame-wise autocorrelation pitch tracking
//! 3. [`partials`]: FFT peak extraction against a candidate f0
//! 4. [`octave`]: half/double correction by harmonic-grid fit
//! 5. [`tuning`] and [`intervals`]: register, EDO step and JI candidates against the
//!    corpus reference
//! 6. [`diagnostics`]: read-only QC flags
//!
//! Stages 1–4 run per bar; stage 5 needs the corpus reference (lowest f0), so
//! [`pipeline`] splits the work into two phases with an explicit reduction between them.
//!
//! ## Quick start
//!
//! ```no_run
//! use bartune_core::{AnalysisConfig, BarInput, analyze_bar, finalize_corpus, input::decode_file};
//!
//! let cfg = AnalysisConfig::default();
//! let wave = decode_file("audio/5edo/bar01.wav")?;
//! let input = BarInput {
//!     bar_id: "edo5-0123456789ab".into(),
//!     instrument_id: "edo5".into(),
//!     position_index: 1,
//!     ..Default::default()
//! };
//! let bar = analyze_bar(input, &wave, &cfg)?;
//! let corpus = finalize_corpus(vec![bar], &cfg)?;
//! println!("f_ref = {:.3} Hz", corpus.reference.f_ref_hz_measured);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod common;
pub mod config;
pub mod diagnostics;
pub mod f0;
pub mod input;
pub mod intervals;
pub mod octave;
pub mod partials;
pub mod pipeline;
pub mod record;
pub mod tuning;
pub mod window;

pub use config::AnalysisConfig;
pub use diagnostics::QcEntry;
pub use input::Waveform;
pub use pipeline::{
    BarAnalysis, BarError, BarInput, CorpusSummary, PipelineError, Stage, analyze_bar,
    analyze_bars, finalize_corpus, select_reference,
};
pub use record::{BarMetadata, BarRecord, BuildStats, Reference};
