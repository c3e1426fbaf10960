//! HTTP contract of the remote Genie TTS server.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use genie_tts_core::error::{Result, TtsError};

/// Timeout for load/unload/reference-audio calls.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single `/tts` call.
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct LoadCharacterRequest {
    pub character_name: String,
    pub onnx_model_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceAudioRequest {
    pub character_name: String,
    pub audio_path: String,
    pub audio_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnloadCharacterRequest {
    pub character_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    pub character_name: String,
    pub text: String,
    pub split_sentence: bool,
}

/// Operations the remote TTS server exposes.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn load_character(&self, request: &LoadCharacterRequest) -> Result<()>;

    async fn set_reference_audio(&self, request: &ReferenceAudioRequest) -> Result<()>;

    async fn unload_character(&self, request: &UnloadCharacterRequest) -> Result<()>;

    /// Returns the raw PCM payload (mono, 16-bit LE, 32 kHz).
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes>;
}

/// reqwest-based client for the Genie TTS server.
pub struct HttpTtsBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTtsBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST to TTS server");

        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| TtsError::RemoteUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TtsError::RequestFailed(format!("{path} returned {status}: {body}")));
        }

        Ok(resp)
    }
}

#[async_trait]
impl TtsBackend for HttpTtsBackend {
    async fn load_character(&self, request: &LoadCharacterRequest) -> Result<()> {
        self.post("/load_character", request, CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn set_reference_audio(&self, request: &ReferenceAudioRequest) -> Result<()> {
        self.post("/set_reference_audio", request, CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn unload_character(&self, request: &UnloadCharacterRequest) -> Result<()> {
        self.post("/unload_character", request, CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes> {
        let resp = self.post("/tts", request, SYNTHESIS_TIMEOUT).await?;
        resp.bytes()
            .await
            .map_err(|e| TtsError::RemoteUnavailable(e.to_string()))
    }
}
