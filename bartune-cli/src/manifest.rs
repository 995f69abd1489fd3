//! `manifest/bars.csv`: the hand-edited per-bar metadata table.
//!
//! The builder owns `bar_id`, `instrument_id` and `audio_file`; every other column is
//! left to the curator and carried through untouched.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::scan::AudioEntry;

pub const CSV_HEADER: [&str; 10] = [
    "bar_id",
    "instrument_id",
    "position_index",
    "label_index_mod",
    "audio_file",
    "spectrogram_file",
    "youtube_url",
    "youtube_timecode",
    "session_id",
    "notes",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestRow {
    pub bar_id: String,
    pub instrument_id: String,
    pub position_index: String,
    pub label_index_mod: String,
    pub audio_file: String,
    pub spectrogram_file: String,
    pub youtube_url: String,
    pub youtube_timecode: String,
    pub session_id: String,
    pub notes: String,
}

impl ManifestRow {
    fn for_entry(entry: &AudioEntry) -> Self {
        Self {
            bar_id: entry.bar_id.clone(),
            instrument_id: entry.instrument_id.clone(),
            audio_file: entry.source_path.clone(),
            ..Default::default()
        }
    }

    fn from_fields(mut fields: Vec<String>) -> Self {
        fields.resize(CSV_HEADER.len(), String::new());
        let mut it = fields.into_iter();
        let mut next = || it.next().unwrap_or_default();
        Self {
            bar_id: next(),
            instrument_id: next(),
            position_index: next(),
            label_index_mod: next(),
            audio_file: next(),
            spectrogram_file: next(),
            youtube_url: next(),
            youtube_timecode: next(),
            session_id: next(),
            notes: next(),
        }
    }

    fn fields(&self) -> [&str; 10] {
        [
            &self.bar_id,
            &self.instrument_id,
            &self.position_index,
            &self.label_index_mod,
            &self.audio_file,
            &self.spectrogram_file,
            &self.youtube_url,
            &self.youtube_timecode,
            &self.session_id,
            &self.notes,
        ]
    }

    /// Explicit position, if the curator filled one in.
    pub fn position(&self) -> Result<Option<i64>> {
        parse_optional_int(&self.position_index)
            .with_context(|| format!("bad position_index for {}", self.bar_id))
    }

    pub fn label_index(&self) -> Result<Option<i64>> {
        parse_optional_int(&self.label_index_mod)
            .with_context(|| format!("bad label_index_mod for {}", self.bar_id))
    }
}

fn parse_optional_int(raw: &str) -> Result<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(raw.parse::<i64>().with_context(|| format!("not an integer: {raw:?}"))?))
}

/// Split CSV text into records. Handles quoted fields, doubled quotes and CRLF.
fn parse_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_rows<'a>(path: &Path, rows: impl IntoIterator<Item = &'a ManifestRow>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    writeln!(w, "{}", CSV_HEADER.join(","))?;
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| quote(f)).collect();
        writeln!(w, "{}", line.join(","))?;
    }
    w.flush()?;
    Ok(())
}

fn read_rows(path: &Path) -> Result<HashMap<String, ManifestRow>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut records = parse_records(&text)
        .with_context(|| format!("parsing {}", path.display()))?
        .into_iter();

    let header = records.next().unwrap_or_default();
    if header != CSV_HEADER {
        bail!("manifest header mismatch. expected {CSV_HEADER:?} got {header:?}");
    }

    let mut rows = HashMap::new();
    for fields in records {
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        let mut row = ManifestRow::from_fields(fields);
        row.bar_id = row.bar_id.trim().to_string();
        if row.bar_id.is_empty() {
            bail!("manifest contains empty bar_id");
        }
        rows.insert(row.bar_id.clone(), row);
    }
    Ok(rows)
}

/// Sync the manifest with the scanned entries and return its rows by bar id.
///
/// Creates the file when missing, adds rows for new recordings and rewrites it in scan
/// order. Rows for recordings that no longer exist are returned but not written back.
pub fn load_or_create(path: &Path, entries: &[AudioEntry]) -> Result<HashMap<String, ManifestRow>> {
    let mut rows = if path.exists() {
        read_rows(path)?
    } else {
        log::info!("creating manifest {}", path.display());
        HashMap::new()
    };

    let mut added = 0;
    for entry in entries {
        let row = rows.entry(entry.bar_id.clone()).or_insert_with(|| {
            added += 1;
            ManifestRow::for_entry(entry)
        });
        row.instrument_id.clone_from(&entry.instrument_id);
        row.audio_file.clone_from(&entry.source_path);
    }
    if added > 0 {
        log::info!("manifest: {added} new bars");
    }

    write_rows(path, entries.iter().filter_map(|e| rows.get(&e.bar_id)))?;
    Ok(rows)
}
