//! WAV container writing and silence trimming.
//!
//! The server returns headerless PCM: mono, 16-bit signed little-endian,
//! 32 kHz.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use genie_tts_core::error::{Result, TtsError};

pub const SAMPLE_RATE: u32 = 32_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// Whether this build can trim silence.
pub const TRIM_AVAILABLE: bool = cfg!(feature = "silence-trim");

pub fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

fn audio_err(e: hound::Error) -> TtsError {
    TtsError::Audio(e.to_string())
}

/// Decode raw little-endian PCM bytes. A dangling odd byte is dropped.
pub fn pcm_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Run `write` against `path`, deleting whatever it left behind on failure.
fn remove_on_error(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let written = write(path);
    if written.is_err() && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), %e, "Failed to remove partial audio file");
        }
    }
    written
}

/// Write samples as a mono 16-bit 32 kHz WAV file. A failed write leaves
/// no file behind.
pub fn write_samples(path: &Path, samples: &[i16]) -> Result<()> {
    remove_on_error(path, |path| write_samples_unguarded(path, samples))
}

fn write_samples_unguarded(path: &Path, samples: &[i16]) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec())
        .map_err(audio_err)?;
    {
        let mut pcm = writer.get_i16_writer(samples.len() as u32);
        for &s in samples {
            pcm.write_sample(s);
        }
        pcm.flush().map_err(audio_err)?;
    }
    writer.finalize().map_err(audio_err)
}

/// Wrap a raw PCM payload into a WAV file at `path`.
pub fn write_pcm_wav(path: &Path, pcm: &[u8]) -> Result<()> {
    write_samples(path, &pcm_samples(pcm))
}

pub fn read_samples(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path).map_err(audio_err)?;
    reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(audio_err)
}

#[derive(Debug, Clone)]
pub struct TrimSettings {
    /// Chunks quieter than this (dBFS) count as silence.
    pub threshold_db: f64,
    /// Audio kept after the detected end of sound.
    pub margin: Duration,
    /// Analysis window.
    pub chunk: Duration,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            margin: Duration::from_millis(100),
            chunk: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub leading: Duration,
    pub trailing: Duration,
}

fn samples_for(duration: Duration) -> usize {
    (duration.as_micros() as u64 * SAMPLE_RATE as u64 / 1_000_000) as usize
}

fn duration_of(samples: usize) -> Duration {
    Duration::from_micros(samples as u64 * 1_000_000 / SAMPLE_RATE as u64)
}

/// Loudness of a chunk relative to 16-bit full scale.
pub fn dbfs(chunk: &[i16]) -> f64 {
    if chunk.is_empty() {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = chunk.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum / chunk.len() as f64).sqrt();
    if rms == 0.0 {
        return f64::NEG_INFINITY;
    }
    20.0 * (rms / 32768.0).log10()
}

fn leading_silence(samples: &[i16], chunk: usize, threshold_db: f64) -> usize {
    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + chunk).min(samples.len());
        if dbfs(&samples[pos..end]) >= threshold_db {
            break;
        }
        pos = end;
    }
    pos
}

fn trailing_silence(samples: &[i16], chunk: usize, threshold_db: f64) -> usize {
    let mut end = samples.len();
    while end > 0 {
        let start = end.saturating_sub(chunk);
        if dbfs(&samples[start..end]) >= threshold_db {
            break;
        }
        end = start;
    }
    samples.len() - end
}

/// Sample range `[start, end)` that survives trimming, or `None` when the
/// whole clip is silent.
pub fn audible_range(samples: &[i16], settings: &TrimSettings) -> Option<(usize, usize)> {
    let chunk = samples_for(settings.chunk).max(1);
    let lead = leading_silence(samples, chunk, settings.threshold_db);
    if lead >= samples.len() {
        return None;
    }
    let trail = trailing_silence(samples, chunk, settings.threshold_db);
    let end = (samples.len() - trail + samples_for(settings.margin)).min(samples.len());
    Some((lead, end))
}

/// Trim leading and trailing silence of the WAV at `path` in place.
///
/// An all-silent clip is left untouched.
#[cfg(feature = "silence-trim")]
pub fn trim_silence(path: &Path, settings: &TrimSettings) -> Result<TrimReport> {
    let samples = read_samples(path)?;
    let Some((start, end)) = audible_range(&samples, settings) else {
        return Ok(TrimReport {
            leading: Duration::ZERO,
            trailing: Duration::ZERO,
        });
    };
    let report = TrimReport {
        leading: duration_of(start),
        trailing: duration_of(samples.len() - end),
    };
    if start == 0 && end == samples.len() {
        return Ok(report);
    }

    let tmp = path.with_extension("wav.tmp");
    write_samples(&tmp, &samples[start..end])?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(report)
}

#[cfg(not(feature = "silence-trim"))]
pub fn trim_silence(_path: &Path, _settings: &TrimSettings) -> Result<TrimReport> {
    Err(TtsError::Audio("silence trimming not compiled in".into()))
}
