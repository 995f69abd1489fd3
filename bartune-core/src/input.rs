//! Decode collaborator: turn an audio file into a mono [`Waveform`].
//!
//! Pipeline:
//! 1) Decode with symphonia, averaging all channels to mono f32.
//! 2) If symphonia cannot read an `.m4a`/`.opus` container, pipe the file through
//!    `ffmpeg` (raw f32le, mono) and read the sample rate with `ffprobe`.
//! 3) Reject zero-length output.
//!
//! Nothing downstream of this module touches the filesystem.

use std::fs::File;
use std::path::Path;
use std::process::Command;

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;

/// Extensions that may be handed to the external decoder when symphonia fails.
pub const EXTERNAL_DECODER_EXTENSIONS: &[&str] = &["m4a", "opus"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid-data: {0}")]
    InvalidData(String),
    #[error("external decoder failed for {path}: {message}")]
    External { path: String, message: String },
    #[error("empty audio: {0}")]
    Empty(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono audio with its sample rate. Immutable once decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_s(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Borrow `[start, end)` as a sample slice, clamped to the signal length.
    pub fn segment(&self, start: usize, end: usize) -> &[f32] {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        &self.samples[start..end]
    }
}

/// Main entry: decode a file, falling back to ffmpeg for the containers symphonia lacks.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Waveform, InputError> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let waveform = match decode_to_mono_f32(path) {
        Ok(w) => w,
        Err(err) if EXTERNAL_DECODER_EXTENSIONS.contains(&ext.as_str()) => {
            log::warn!(
                "symphonia could not decode {} ({}); falling back to ffmpeg",
                path.display(),
                err
            );
            decode_with_ffmpeg(path)?
        }
        Err(err) => return Err(err),
    };

    if waveform.is_empty() {
        return Err(InputError::Empty(path.display().to_string()));
    }
    log::debug!(
        "decoded {}: {} samples at {} Hz",
        path.display(),
        waveform.len(),
        waveform.sample_rate()
    );
    Ok(waveform)
}

// --------------------------- Decoding -----------------------------

fn decode_to_mono_f32(path: &Path) -> Result<Waveform, InputError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| InputError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| InputError::InvalidData("No default audio track".into()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| InputError::Decode(e.to_string()))?;

    let sr = track
        .codec_params
        .sample_rate
        .ok_or_else(|| InputError::InvalidData("Missing sample rate".into()))?;

    let mut out = Vec::<f32>::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::ResetRequired) => {
                return Err(InputError::Decode(
                    "Decoder requires a reset (unsupported midstream change)".into(),
                ));
            }
            Err(_) => break, // End of stream
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| InputError::Decode(e.to_string()))?;

        let spec = *decoded.spec();
        let ch = spec.channels.count();
        let mut sbuf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sbuf.copy_interleaved_ref(decoded);
        push_interleaved_as_mono(sbuf.samples(), ch, &mut out);
    }

    Ok(Waveform::new(out, sr))
}

fn push_interleaved_as_mono(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }
    for frame in samples.chunks_exact(channels) {
        out.push(frame.iter().sum::<f32>() / channels as f32);
    }
}

fn decode_with_ffmpeg(path: &Path) -> Result<Waveform, InputError> {
    let path_str = path.to_string_lossy();
    let external = |message: String| InputError::External {
        path: path_str.to_string(),
        message,
    };

    let output = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-i",
            &path_str,
            "-f",
            "f32le",
            "-ac",
            "1",
            "-acodec",
            "pcm_f32le",
            "-",
        ])
        .output()
        .map_err(|e| external(format!("could not run ffmpeg: {e}")))?;
    if !output.status.success() {
        return Err(external(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let probe = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=sample_rate",
            "-of",
            "csv=p=0",
            &path_str,
        ])
        .output()
        .map_err(|e| external(format!("could not run ffprobe: {e}")))?;
    if !probe.status.success() {
        return Err(external(format!(
            "ffprobe sample rate failed: {}",
            String::from_utf8_lossy(&probe.stderr).trim()
        )));
    }
    let sr: u32 = String::from_utf8_lossy(&probe.stdout)
        .trim()
        .parse()
        .map_err(|e| external(format!("unparsable sample rate: {e}")))?;

    Ok(Waveform::new(f32le_to_samples(&output.stdout), sr))
}

fn f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
