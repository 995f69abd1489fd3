//! Discover bar recordings under the audio folders and give each a stable id.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::LayoutConfig;

/// One recording, addressed relative to the dataset root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEntry {
    pub instrument_id: String,
    pub source_filename: String,
    /// Repository-relative path with `/` separators.
    pub source_path: String,
    pub bar_id: String,
}

/// `<instrument_id>-<first 12 hex digits of SHA-256(relative path)>`.
///
/// Ids must match the ones already written to `manifest/bars.csv` and `data/bars/`.
pub fn bar_id_for(instrument_id: &str, rel_path: &str) -> String {
    let hash = format!("{:x}", Sha256::digest(rel_path.as_bytes()));
    format!("{instrument_id}-{}", &hash[..12])
}

#[derive(Debug, PartialEq, Eq)]
enum KeyPart {
    Text(String),
    Number(u128),
}

/// Case-insensitive, digit-aware sort key: "bar2" < "bar10".
fn natural_key(name: &str) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_digits = None;
    for ch in name.to_lowercase().chars() {
        let is_digit = ch.is_ascii_digit();
        if in_digits.is_some_and(|d| d != is_digit) {
            parts.push(key_part(&current, in_digits == Some(true)));
            current.clear();
        }
        current.push(ch);
        in_digits = Some(is_digit);
    }
    if !current.is_empty() {
        parts.push(key_part(&current, in_digits == Some(true)));
    }
    parts
}

fn key_part(s: &str, digits: bool) -> KeyPart {
    match s.parse::<u128>() {
        Ok(n) if digits => KeyPart::Number(n),
        _ => KeyPart::Text(s.to_string()),
    }
}

fn compare_natural(a: &str, b: &str) -> Ordering {
    let (ka, kb) = (natural_key(a), natural_key(b));
    for (x, y) in ka.iter().zip(&kb) {
        let ord = match (x, y) {
            (KeyPart::Number(m), KeyPart::Number(n)) => m.cmp(n),
            (KeyPart::Text(s), KeyPart::Text(t)) => s.cmp(t),
            // Numbers sort before text at the same position.
            (KeyPart::Number(_), KeyPart::Text(_)) => Ordering::Less,
            (KeyPart::Text(_), KeyPart::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ka.len().cmp(&kb.len()).then_with(|| a.cmp(b))
}

/// Scan every configured folder, in configured order.
///
/// Hidden files are ignored. A missing folder, an unsupported file or an empty folder
/// is an error.
pub fn scan_audio_entries(root: &Path, layout: &LayoutConfig) -> Result<Vec<AudioEntry>> {
    let audio_root = root.join(&layout.audio_dir);
    if !audio_root.is_dir() {
        bail!("audio directory not found: {}", audio_root.display());
    }

    let mut entries = Vec::new();
    for mapping in &layout.folders {
        let folder = audio_root.join(&mapping.folder);
        if !folder.is_dir() {
            bail!("missing expected folder: {}", folder.display());
        }

        let mut audio_files = Vec::new();
        let mut unsupported = Vec::new();
        for entry in WalkDir::new(&folder).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("reading {}", folder.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            if layout.extensions.contains(&ext) {
                audio_files.push(name);
            } else {
                unsupported.push(name);
            }
        }

        if !unsupported.is_empty() {
            unsupported.sort();
            bail!("unsupported files in {}: {:?}", folder.display(), unsupported);
        }
        if audio_files.is_empty() {
            bail!("no audio files found in {}", folder.display());
        }

        audio_files.sort_by(|a, b| compare_natural(a, b));
        log::debug!("{}: {} recordings", mapping.instrument_id, audio_files.len());
        let rel_dir = layout.audio_dir.join(&mapping.folder);
        for name in audio_files {
            let rel = rel_dir
                .join(&name)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(AudioEntry {
                instrument_id: mapping.instrument_id.clone(),
                bar_id: bar_id_for(&mapping.instrument_id, &rel),
                source_filename: name,
                source_path: rel,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn layout_with(folders: &[(&str, &str)]) -> LayoutConfig {
        LayoutConfig {
            folders: folders
                .iter()
                .map(|(f, i)| crate::config::FolderMapping {
                    folder: f.to_string(),
                    instrument_id: i.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn natural_order_is_digit_aware() {
        let mut names = vec!["Bar10.wav", "bar2.wav", "bar1.flac", "bar02b.wav"];
        names.sort_by(|a, b| compare_natural(a, b));
        assert_eq!(names, ["bar1.flac", "bar2.wav", "bar02b.wav", "Bar10.wav"]);
    }

    #[test]
    fn bar_ids_are_stable_and_prefixed() {
        let a = bar_id_for("edo5", "audio/5edo/bar1.wav");
        assert_eq!(a, bar_id_for("edo5", "audio/5edo/bar1.wav"));
        assert_ne!(a, bar_id_for("edo5", "audio/5edo/bar2.wav"));
        assert!(a.starts_with("edo5-"));
        assert_eq!(a.len(), "edo5-".len() + 12);
        assert!(a[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn bar_ids_match_existing_datasets() {
        assert_eq!(bar_id_for("edo5", "audio/5edo/bar1.wav"), "edo5-2c55ce5b9ced");
        assert_eq!(bar_id_for("harmonic", "audio/5edo/bar1.wav"), "harmonic-2c55ce5b9ced");
    }

    #[test]
    fn scans_in_folder_then_natural_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("audio/5edo/b10.wav"));
        touch(&root.join("audio/5edo/b9.WAV"));
        touch(&root.join("audio/5edo/.DS_Store"));
        touch(&root.join("audio/harmonic/h1.opus"));

        let entries = scan_audio_entries(root, &layout_with(&[("5edo", "edo5"), ("harmonic", "harmonic")]))
            .unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.source_path.as_str()).collect();
        assert_eq!(paths, ["audio/5edo/b9.WAV", "audio/5edo/b10.wav", "audio/harmonic/h1.opus"]);
        assert_eq!(entries[0].source_filename, "b9.WAV");
        assert_eq!(entries[2].instrument_id, "harmonic");
        assert_eq!(entries[0].bar_id, bar_id_for("edo5", "audio/5edo/b9.WAV"));
    }

    #[test]
    fn unsupported_and_empty_folders_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("audio/5edo/notes.txt"));
        touch(&root.join("audio/5edo/b1.wav"));
        let err = scan_audio_entries(root, &layout_with(&[("5edo", "edo5")])).unwrap_err();
        assert!(err.to_string().contains("unsupported files"));

        fs::create_dir_all(root.join("audio/7edo")).unwrap();
        let err = scan_audio_entries(root, &layout_with(&[("7edo", "edo7")])).unwrap_err();
        assert!(err.to_string().contains("no audio files"));

        let err = scan_audio_entries(root, &layout_with(&[("9edo", "edo9")])).unwrap_err();
        assert!(err.to_string().contains("missing expected folder"));
    }
}
