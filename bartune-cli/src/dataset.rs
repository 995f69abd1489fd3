//! `bartune build`: scan, sync the manifest, analyze every bar and write the dataset.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use bartune_core::input::decode_file;
use bartune_core::record::{Checksums, Media, Provenance, Revision};
use bartune_core::{BarAnalysis, BarError, BarInput, BarMetadata, Reference, analyze_bars, finalize_corpus};

use crate::config::AppConfig;
use crate::manifest::{self, ManifestRow};
use crate::output::{self, Stamp};
use crate::scan::{AudioEntry, scan_audio_entries};

const REVISION_AUTHOR: &str = "bartune";

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Skip bars that fail instead of aborting the run.
    pub keep_going: bool,
    pub workers: usize,
}

#[derive(Clone, Debug)]
pub struct BuildReport {
    pub n_bars: usize,
    pub n_skipped: usize,
    pub n_flagged: usize,
    pub reference: Reference,
}

/// Phase-1 inputs in scan order, with positions and caller metadata resolved.
fn bar_inputs(
    root: &Path,
    entries: &[AudioEntry],
    rows: &HashMap<String, ManifestRow>,
    stamp: &Stamp,
) -> Result<Vec<BarInput>> {
    let mut natural_index: HashMap<&str, i64> = HashMap::new();
    let mut inputs = Vec::with_capacity(entries.len());

    for entry in entries {
        let default_pos = natural_index.entry(entry.instrument_id.as_str()).or_insert(0);
        *default_pos += 1;

        let row = rows.get(&entry.bar_id).cloned().unwrap_or_default();
        let (position_index, position_note) = match row.position()? {
            Some(p) => (p, "from manifest"),
            None => (*default_pos, "derived from natural filename order"),
        };
        let non_empty = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string);

        let audio_sha256 = output::file_sha256(&root.join(&entry.source_path))?;
        let metadata = BarMetadata {
            label_index_mod: row.label_index()?,
            source_filename: entry.source_filename.clone(),
            source_path: entry.source_path.clone(),
            media: Media {
                audio_path: entry.source_path.clone(),
                youtube_url: non_empty(&row.youtube_url),
                spectrogram_path: non_empty(&row.spectrogram_file),
                checksums: Checksums { audio_sha256 },
            },
            provenance: Provenance {
                notes: row.notes.trim().to_string(),
                method_version: stamp.method_version.clone(),
                ..Default::default()
            },
            revision_history: vec![Revision {
                date: stamp.generated_at.clone(),
                by: REVISION_AUTHOR.into(),
                change: "initial record creation".into(),
            }],
            ..Default::default()
        };

        inputs.push(BarInput {
            bar_id: entry.bar_id.clone(),
            instrument_id: entry.instrument_id.clone(),
            position_index,
            position_note: Some(position_note.into()),
            metadata,
        });
    }
    Ok(inputs)
}

/// Run phase 1 on a dedicated pool of `workers` threads.
fn analyze(
    root: &Path,
    inputs: Vec<BarInput>,
    config: &AppConfig,
    workers: usize,
) -> Result<Vec<Result<BarAnalysis, BarError>>> {
    let mut cfg = config.analysis.clone();
    cfg.parallel |= workers > 1;
    let load = |bar: &BarInput| decode_file(root.join(&bar.metadata.source_path));

    if !cfg.parallel {
        return Ok(analyze_bars(inputs, load, &cfg));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("building analysis thread pool")?;
    Ok(pool.install(|| analyze_bars(inputs, load, &cfg)))
}

pub fn build_dataset(root: &Path, config: &AppConfig, opts: &BuildOptions) -> Result<BuildReport> {
    let layout = &config.layout;
    let stamp = Stamp::from_git(root);
    log::info!("method version {} ({})", stamp.method_version, stamp.generated_at);

    let entries = scan_audio_entries(root, layout)?;
    log::info!("found {} recordings", entries.len());
    let rows = manifest::load_or_create(&root.join(&layout.manifest), &entries)?;
    let instruments = output::sync_instruments(&root.join(&layout.instruments), layout.instrument_ids())?;

    let inputs = bar_inputs(root, &entries, &rows, &stamp)?;
    let results = analyze(root, inputs, config, opts.workers)?;

    let mut bars = Vec::with_capacity(results.len());
    let mut warnings = Vec::new();
    for result in results {
        match result {
            Ok(bar) => bars.push(bar),
            Err(err) if opts.keep_going => {
                log::warn!("skipping {err}");
                warnings.push(format!("skipped {err}"));
            }
            Err(err) => return Err(err).context("bar analysis failed (use --keep-going to skip)"),
        }
    }

    let mut summary = finalize_corpus(bars, &config.analysis).context("finalizing corpus")?;
    summary.build_stats.warnings = warnings;

    output::write_bar_records(&root.join(&layout.bars_dir), &summary.bars)?;
    output::write_index(&root.join(&layout.index), &stamp, &summary, &instruments)?;
    output::write_qc(&root.join(&layout.qc), &stamp, &summary.qc)?;
    output::write_qc_readme(&root.join(&layout.qc_readme), &layout.qc, &config.analysis.quality)?;

    Ok(BuildReport {
        n_bars: summary.bars.len(),
        n_skipped: summary.build_stats.warnings.len(),
        n_flagged: summary.qc.iter().filter(|q| q.is_flagged()).count(),
        reference: summary.reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FolderMapping;
    use serde_json::Value;
    use std::f64::consts::PI;

    const SR: u32 = 48_000;

    /// 16-bit mono PCM WAV holding a three-harmonic tone.
    fn wav_tone(f0: f64, dur: f64) -> Vec<u8> {
        let n = (SR as f64 * dur) as usize;
        let pcm: Vec<u8> = (0..n)
            .flat_map(|i| {
                let t = i as f64 / SR as f64;
                let x = 0.5 * (2.0 * PI * f0 * t).sin()
                    + 0.25 * (2.0 * PI * 2.0 * f0 * t).sin()
                    + 0.12 * (2.0 * PI * 3.0 * f0 * t).sin();
                ((x * i16::MAX as f64) as i16).to_le_bytes()
            })
            .collect();
        let mut out = Vec::with_capacity(44 + pcm.len());
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&SR.to_le_bytes());
        out.extend_from_slice(&(SR * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
        out.extend_from_slice(&pcm);
        out
    }

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn two_folder_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.layout.folders = vec![
            FolderMapping {
                folder: "5edo".into(),
                instrument_id: "edo5".into(),
            },
            FolderMapping {
                folder: "harmonic".into(),
                instrument_id: "harmonic".into(),
            },
        ];
        config
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn opts(keep_going: bool) -> BuildOptions {
        BuildOptions { keep_going, workers: 1 }
    }

    #[test]
    fn positions_come_from_manifest_or_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "audio/5edo/a1.wav", b"x");
        write(root, "audio/5edo/a2.wav", b"y");
        write(root, "audio/harmonic/h1.wav", b"z");
        let config = two_folder_config();
        let entries = scan_audio_entries(root, &config.layout).unwrap();

        let mut rows: HashMap<String, ManifestRow> = HashMap::new();
        rows.insert(
            entries[1].bar_id.clone(),
            ManifestRow {
                bar_id: entries[1].bar_id.clone(),
                position_index: "9".into(),
                label_index_mod: "4".into(),
                youtube_url: " https://example.org/v ".into(),
                notes: "cracked".into(),
                ..Default::default()
            },
        );
        let stamp = Stamp {
            method_version: "abc1234".into(),
            generated_at: "2026-01-01T00:00:00+00:00".into(),
        };

        let inputs = bar_inputs(root, &entries, &rows, &stamp).unwrap();
        let positions: Vec<i64> = inputs.iter().map(|i| i.position_index).collect();
        assert_eq!(positions, [1, 9, 1]);
        assert_eq!(inputs[0].position_note.as_deref(), Some("derived from natural filename order"));
        assert_eq!(inputs[1].position_note.as_deref(), Some("from manifest"));

        let meta = &inputs[1].metadata;
        assert_eq!(meta.label_index_mod, Some(4));
        assert_eq!(meta.media.youtube_url.as_deref(), Some("https://example.org/v"));
        assert_eq!(meta.media.spectrogram_path, None);
        assert_eq!(
            meta.media.checksums.audio_sha256,
            "a1fce4363854ff888cff4b8e7875d600c2682390412a8cf79b37d0b11148b0fa"
        );
        assert_eq!(meta.provenance.notes, "cracked");
        assert_eq!(meta.provenance.method_version, "abc1234");
        assert_eq!(meta.revision_history[0].by, "bartune");
        assert_eq!(meta.license.audio, "TBD");
    }

    #[test]
    fn builds_the_dataset_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "audio/5edo/bar1.wav", &wav_tone(200.0, 1.5));
        write(root, "audio/5edo/bar2.wav", &wav_tone(200.0 * 2f64.powf(0.4), 1.5));
        write(root, "audio/harmonic/h1.wav", &wav_tone(300.0, 1.5));

        let config = two_folder_config();
        let report = build_dataset(root, &config, &opts(false)).unwrap();
        assert_eq!(report.n_bars, 3);
        assert_eq!(report.n_skipped, 0);

        let index = read_json(&root.join("data/index.json"));
        assert_eq!(index["method_version"], "dev");
        assert_eq!(index["f_ref"]["bar_id"], report.reference.bar_id.as_str());
        assert!(report.reference.bar_id.starts_with("edo5-"));
        let rows = index["bars"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["instrument_id"], "harmonic");
        assert_eq!(index["build_stats"]["n_bars"], 3);
        assert_eq!(index["instruments"]["edo5"]["edo"], 5);

        let bar = read_json(&root.join(format!("data/bars/{}.json", report.reference.bar_id)));
        assert_eq!(bar["global_order_index"], 1);
        assert_eq!(bar["register"]["octave_abs"], 0);
        assert_eq!(bar["media"]["audio_path"], "audio/5edo/bar1.wav");
        assert_eq!(bar["revision_history"][0]["change"], "initial record creation");

        let qc = read_json(&root.join("reports/qc.json"));
        assert_eq!(qc["bars"].as_array().unwrap().len(), 3);
        assert!(root.join("reports/README.md").is_file());

        let manifest = std::fs::read_to_string(root.join("manifest/bars.csv")).unwrap();
        assert_eq!(manifest.lines().count(), 4);
        assert!(root.join("data/instruments.json").is_file());
    }

    #[test]
    fn keep_going_records_skipped_bars() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "audio/5edo/bar1.wav", &wav_tone(250.0, 1.5));
        write(root, "audio/harmonic/broken.wav", b"not audio at all");
        let config = two_folder_config();

        let err = build_dataset(root, &config, &opts(false)).unwrap_err();
        assert!(format!("{err:#}").contains("decode failed"), "{err:#}");

        let report = build_dataset(root, &config, &opts(true)).unwrap();
        assert_eq!(report.n_bars, 1);
        assert_eq!(report.n_skipped, 1);
        let index = read_json(&root.join("data/index.json"));
        let warning = index["build_stats"]["warnings"][0].as_str().unwrap();
        assert!(warning.starts_with("skipped bar harmonic-"), "{warning}");
    }
}
