//! Text to WAV file via the remote server, with bounded retries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use genie_tts_core::config::TtsConfig;
use genie_tts_core::error::{Result, TtsError};

use crate::artifacts::ArtifactDir;
use crate::backend::{SynthesisRequest, TtsBackend};
use crate::lifecycle::ModelLifecycle;
use crate::wav::{self, TrimSettings};

/// Payloads smaller than this are a server-side synthesis failure.
pub const MIN_AUDIO_BYTES: usize = 1000;

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub character_name: String,
    pub split_sentence: bool,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub min_audio_bytes: usize,
    /// `None` disables silence trimming.
    pub trim: Option<TrimSettings>,
}

impl SynthesisSettings {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            character_name: config.character_name.clone(),
            split_sentence: config.split_sentence,
            max_attempts: config.retry_attempts.max(1),
            backoff: Duration::from_secs(1),
            min_audio_bytes: MIN_AUDIO_BYTES,
            trim: config.trim_silence.then(|| TrimSettings {
                threshold_db: config.silence_threshold_db,
                margin: Duration::from_millis(config.trim_margin_ms),
                ..TrimSettings::default()
            }),
        }
    }
}

/// A generated audio file awaiting delivery.
#[derive(Debug, Clone)]
pub struct SynthesisArtifact {
    pub path: PathBuf,
    /// Size of the raw PCM payload.
    pub bytes: usize,
    pub attempts: u32,
}

pub struct AudioSynthesizer {
    backend: Arc<dyn TtsBackend>,
    lifecycle: ModelLifecycle,
    artifacts: ArtifactDir,
    settings: SynthesisSettings,
}

impl AudioSynthesizer {
    pub fn new(
        backend: Arc<dyn TtsBackend>,
        lifecycle: ModelLifecycle,
        artifacts: ArtifactDir,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            backend,
            lifecycle,
            artifacts,
            settings,
        }
    }

    pub fn artifacts(&self) -> &ArtifactDir {
        &self.artifacts
    }

    /// Synthesize `text` into a fresh WAV file.
    ///
    /// Retryable failures are retried up to `max_attempts` total with a fixed
    /// backoff; the last error is returned once attempts run out.
    pub async fn synthesize(&self, text: &str) -> Result<SynthesisArtifact> {
        if !self.lifecycle.is_loaded().await {
            return Err(TtsError::NotReady);
        }
        if text.trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        let mut artifact = loop {
            attempt += 1;
            let err = match self.attempt(text).await {
                Ok((path, bytes)) => {
                    break SynthesisArtifact {
                        path,
                        bytes,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= max_attempts {
                error!(attempts = attempt, %err, "Audio generation failed");
                return Err(err);
            }
            warn!(attempt, max_attempts, %err, "Audio generation failed, retrying");
            tokio::time::sleep(self.settings.backoff).await;
        };

        info!(
            path = %artifact.path.display(),
            bytes = artifact.bytes,
            attempts = artifact.attempts,
            "Audio generated"
        );

        if let Some(trim) = self.settings.trim.clone() {
            artifact.path = self.trim(artifact.path, trim).await;
        }
        Ok(artifact)
    }

    async fn attempt(&self, text: &str) -> Result<(PathBuf, usize)> {
        let request = SynthesisRequest {
            character_name: self.settings.character_name.clone(),
            text: text.to_string(),
            split_sentence: self.settings.split_sentence,
        };
        let pcm = self.backend.synthesize(&request).await?;
        if pcm.len() < self.settings.min_audio_bytes {
            return Err(TtsError::RequestFailed(format!(
                "audio too short ({} bytes)",
                pcm.len()
            )));
        }

        self.artifacts.ensure().await?;
        let path = self.artifacts.new_wav_path();
        let bytes = pcm.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || wav::write_pcm_wav(&target, &pcm))
            .await
            .map_err(|e| TtsError::Audio(e.to_string()))??;
        Ok((path, bytes))
    }

    /// Trim silence in place; any failure leaves the untrimmed file.
    async fn trim(&self, path: PathBuf, settings: TrimSettings) -> PathBuf {
        if !wav::TRIM_AVAILABLE {
            return path;
        }
        let target = path.clone();
        let task = tokio::task::spawn_blocking(move || wav::trim_silence(&target, &settings));
        match task.await {
            Ok(Ok(report)) => {
                info!(
                    leading_ms = report.leading.as_millis() as u64,
                    trailing_ms = report.trailing.as_millis() as u64,
                    "Silence trimmed"
                );
            }
            Ok(Err(e)) => warn!(%e, "Silence trimming failed, keeping untrimmed audio"),
            Err(e) => warn!(%e, "Silence trimming task failed, keeping untrimmed audio"),
        }
        path
    }
}
