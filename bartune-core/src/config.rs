//! Aggregated analysis configuration.
//!
//! Every table is optional when deserialized; missing fields keep their defaults.

use serde::Deserialize;

use crate::diagnostics::QualityConfig;
use crate::f0::F0Config;
use crate::intervals::IntervalConfig;
use crate::octave::OctaveConfig;
use crate::partials::PartialsConfig;
use crate::window::WindowConfig;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub window: WindowConfig,
    /// Also the valid f0 range for octave correction.
    pub f0: F0Config,
    pub partials: PartialsConfig,
    pub octave: OctaveConfig,
    pub intervals: IntervalConfig,
    pub quality: QualityConfig,
    /// Run per-bar analysis on the rayon pool.
    pub parallel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tables_keep_defaults() {
        let cfg: AnalysisConfig = serde_json::from_str(
            r#"{ "f0": { "max_hz": 1500.0 }, "quality": { "min_confidence": 0.5 }, "parallel": true }"#,
        )
        .unwrap();
        assert_eq!(cfg.f0.max_hz, 1500.0);
        assert_eq!(cfg.f0.min_hz, 40.0);
        assert_eq!(cfg.quality.min_confidence, 0.5);
        assert_eq!(cfg.quality.min_grid_fit, 0.45);
        assert_eq!(cfg.intervals.prime_limits, vec![5, 7, 11, 13]);
        assert_eq!(cfg.window.target_s, 1.0);
        assert!(cfg.parallel);
    }
}
