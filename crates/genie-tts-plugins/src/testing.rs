//! In-memory collaborators for plugin tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use genie_tts_core::config::{MemoryConfigStore, TtsConfig};
use genie_tts_core::error::{Result, TtsError};
use genie_tts_engine::backend::{
    LoadCharacterRequest, ReferenceAudioRequest, SynthesisRequest, UnloadCharacterRequest,
};
use genie_tts_engine::TtsBackend;
use genie_tts_providers::{CompletionProvider, ProviderRegistry};

use crate::state::GenieState;

/// Remote TTS server stand-in that always answers with a loud tone.
#[derive(Default)]
pub struct FakeServer {
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
    pub syntheses: AtomicUsize,
    pub fail_synthesis: AtomicBool,
    pub texts: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn syntheses(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsBackend for FakeServer {
    async fn load_character(&self, _request: &LoadCharacterRequest) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_reference_audio(&self, _request: &ReferenceAudioRequest) -> Result<()> {
        Ok(())
    }

    async fn unload_character(&self, _request: &UnloadCharacterRequest) -> Result<()> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes> {
        self.syntheses.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(request.text.clone());
        if self.fail_synthesis.load(Ordering::SeqCst) {
            return Err(TtsError::RequestFailed("/tts returned 500: busy".into()));
        }
        let pcm: Vec<u8> = (0..3200i32)
            .flat_map(|i| {
                let v: i16 = if i % 2 == 0 { 8000 } else { -8000 };
                v.to_le_bytes()
            })
            .collect();
        Ok(Bytes::from(pcm))
    }
}

/// Completion provider with a canned answer that records its requests.
pub struct ScriptedProvider {
    id: String,
    answer: Option<String>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn answering(id: &str, answer: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            answer: Some(answer.into()),
            requests: Mutex::default(),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            answer: None,
            requests: Mutex::default(),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<(String, String)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));
        self.answer
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} timed out", self.id))
    }
}

/// Config tuned for tests: everything open, no trimming delays, temp dir
/// under `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> TtsConfig {
    let mut config = TtsConfig::default();
    config.policy.prob = 1.0;
    config.policy.text_limit = 0;
    config.policy.cooldown = 0;
    config.temp_dir = Some(dir.path().join("temp_audio").to_string_lossy().into_owned());
    config.trim_silence = false;
    config.auto_unload_enabled = false;
    config
}

pub struct Harness {
    pub state: Arc<GenieState>,
    pub server: Arc<FakeServer>,
    pub store: Arc<MemoryConfigStore>,
}

pub fn harness(config: TtsConfig, providers: ProviderRegistry) -> Harness {
    let server = Arc::new(FakeServer::default());
    let store = Arc::new(MemoryConfigStore::new());
    let state = Arc::new(GenieState::new(config, server.clone(), providers, store.clone()));
    Harness {
        state,
        server,
        store,
    }
}

/// Harness whose model is already loaded.
pub async fn loaded_harness(config: TtsConfig, providers: ProviderRegistry) -> Harness {
    let harness = harness(config, providers);
    assert!(harness.state.lifecycle.initialize().await);
    harness
}

/// Wait long enough for deferred file removals scheduled with `delay`.
pub async fn after_cleanup(delay: Duration) {
    tokio::time::sleep(delay + Duration::from_millis(50)).await;
}
