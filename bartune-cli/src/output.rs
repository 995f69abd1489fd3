//! Dataset files: per-bar JSON, index, QC report, instrument registry.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use bartune_core::diagnostics::QualityConfig;
use bartune_core::tuning::edo_divisions;
use bartune_core::{BarRecord, CorpusSummary, QcEntry};
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Pretty JSON with sorted keys and a trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, payload: &T) -> Result<()> {
    // Value's map is ordered, so converting first sorts every object's keys.
    let value = serde_json::to_value(payload)?;
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Build stamp recorded in every output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub method_version: String,
    pub generated_at: String,
}

fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(root).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!text.is_empty()).then_some(text)
}

impl Stamp {
    /// Short HEAD hash and last commit date, or `"dev"` and the current UTC time.
    pub fn from_git(root: &Path) -> Self {
        let method_version = git(root, &["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "dev".into());
        let generated_at = git(root, &["log", "-1", "--format=%cI"]).unwrap_or_else(|| {
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
        });
        Self {
            method_version,
            generated_at,
        }
    }
}

/// SHA-256 of a file's bytes, lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).with_context(|| format!("hashing {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn default_instrument(id: &str) -> Value {
    json!({
        "id": id,
        "metadata": {
            "maker": "",
            "range": "",
            "physical_notes": "",
            "provenance": "",
        },
        "tuning_intent": "",
        "edo": edo_divisions(id),
    })
}

/// Create or extend the instrument registry. Existing entries are never overwritten.
pub fn sync_instruments<'a>(path: &Path, ids: impl IntoIterator<Item = &'a str>) -> Result<Map<String, Value>> {
    let mut registry = if path.exists() {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str::<Value>(&text).with_context(|| format!("parsing {}", path.display()))? {
            Value::Object(map) => map,
            other => anyhow::bail!("{} must hold a JSON object, found {other}", path.display()),
        }
    } else {
        Map::new()
    };
    for id in ids {
        registry
            .entry(id.to_string())
            .or_insert_with(|| default_instrument(id));
    }
    write_json(path, &registry)?;
    Ok(registry)
}

pub fn write_bar_records(dir: &Path, bars: &[BarRecord]) -> Result<()> {
    for bar in bars {
        write_json(&dir.join(format!("{}.json", bar.bar_id)), bar)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct IndexRow<'a> {
    bar_id: &'a str,
    instrument_id: &'a str,
    position_index: i64,
    f0_hz: f64,
    global_order_index: usize,
}

pub fn write_index(path: &Path, stamp: &Stamp, summary: &CorpusSummary, instruments: &Map<String, Value>) -> Result<()> {
    let rows: Vec<IndexRow> = summary
        .bars
        .iter()
        .map(|b| IndexRow {
            bar_id: &b.bar_id,
            instrument_id: &b.instrument_id,
            position_index: b.position_index,
            f0_hz: b.f0_hz(),
            global_order_index: b.global_order_index,
        })
        .collect();
    let payload = json!({
        "generated_at": stamp.generated_at,
        "method_version": stamp.method_version,
        "f_ref": summary.reference,
        "bars": rows,
        "instruments": instruments,
        "build_stats": summary.build_stats,
    });
    write_json(path, &payload)
}

pub fn write_qc(path: &Path, stamp: &Stamp, qc: &[QcEntry]) -> Result<()> {
    let payload = json!({
        "generated_at": stamp.generated_at,
        "method_version": stamp.method_version,
        "bars": qc,
    });
    write_json(path, &payload)
}

/// Human-readable description of the QC flags and their current thresholds.
pub fn qc_readme(qc_file: &Path, cfg: &QualityConfig) -> String {
    format!(
        "# QC report\n\n\
         `{qc}` contains per-bar flags:\n\n\
         - `low_confidence`: f0 confidence < {conf}\n\
         - `unstable_f0`: f0 IQR / median > {iqr}\n\
         - `suspicious_octave`: an octave correction was applied, or harmonic-grid checks suggest likely octave confusion\n\
         - `too_few_peaks`: fewer than {peaks} summary spectral peaks\n\
         - `f0_at_range_boundary`: corrected f0 within {rel}% of the f0 range bounds, or median ACF lag within {lag} sample(s) of its search bounds\n\
         - `harmonic_grid_mismatch`: harmonic-grid fit score for corrected f0 is below {fit}\n\
         - `high_peak_not_near_harmonic`: strongest summary peak is not within {tol}% of a harmonic\n\
         - `fallback_peaks`: no peak cleared the prominence threshold; peaks are the loudest raw bins\n\n\
         ## Re-run\n\n\
         ```bash\nbartune build\n```\n",
        qc = qc_file.display(),
        conf = cfg.min_confidence,
        iqr = cfg.max_rel_iqr,
        peaks = cfg.min_summary_peaks,
        rel = cfg.boundary_rel * 100.0,
        lag = cfg.boundary_lag,
        fit = cfg.min_grid_fit,
        tol = cfg.harmonic_tol * 100.0,
    )
}

pub fn write_qc_readme(path: &Path, qc_file: &Path, cfg: &QualityConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, qc_readme(qc_file, cfg)).with_context(|| format!("writing {}", path.display()))
}
