use std::path::{Path, PathBuf};

use bartune_core::AnalysisConfig;
use serde::Deserialize;

/// Config file looked up under the dataset root when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "bartune.toml";

/// Application configuration loaded from TOML.
/// All fields have defaults; the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Number of parallel analysis workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub layout: LayoutConfig,
    /// Stage parameters for the core pipeline.
    pub analysis: AnalysisConfig,
}

/// Where things live under the dataset root.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub audio_dir: PathBuf,
    pub manifest: PathBuf,
    pub instruments: PathBuf,
    pub bars_dir: PathBuf,
    pub index: PathBuf,
    pub qc: PathBuf,
    pub qc_readme: PathBuf,
    /// Audio sub-folder → instrument id, scanned in this order.
    pub folders: Vec<FolderMapping>,
    /// Accepted audio extensions (lower case, no dot).
    pub extensions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FolderMapping {
    pub folder: String,
    pub instrument_id: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let folders = [
            ("5edo", "edo5"),
            ("7edo", "edo7"),
            ("8edo", "edo8"),
            ("9edo", "edo9"),
            ("harmonic", "harmonic"),
        ]
        .into_iter()
        .map(|(folder, instrument_id)| FolderMapping {
            folder: folder.into(),
            instrument_id: instrument_id.into(),
        })
        .collect();
        Self {
            audio_dir: "audio".into(),
            manifest: "manifest/bars.csv".into(),
            instruments: "data/instruments.json".into(),
            bars_dir: "data/bars".into(),
            index: "data/index.json".into(),
            qc: "reports/qc.json".into(),
            qc_readme: "reports/README.md".into(),
            folders,
            extensions: ["wav", "flac", "m4a", "opus"].map(String::from).to_vec(),
        }
    }
}

impl LayoutConfig {
    pub fn instrument_ids(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(|f| f.instrument_id.as_str())
    }
}

impl AppConfig {
    /// Load config from `path`, or from `<root>/bartune.toml` when no path is given.
    /// Returns default config if the file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load(path: Option<&Path>, root: &Path) -> Self {
        let config_path = path.map_or_else(|| root.join(DEFAULT_CONFIG_FILE), Path::to_path_buf);
        if !config_path.exists() {
            if path.is_some() {
                log::warn!("Config file {} not found. Using defaults.", config_path.display());
            } else {
                log::debug!("No config file found, using defaults");
            }
            return Self::default();
        }
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", config_path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", config_path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }
}
