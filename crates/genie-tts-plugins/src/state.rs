//! Shared state of the Genie TTS plugin.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use genie_tts_core::config::{ConfigStore, PolicyConfig, TtsConfig};
use genie_tts_core::error::{Result, TtsError};
use genie_tts_core::session::SessionStateStore;
use genie_tts_engine::{
    ArtifactDir, AudioSynthesizer, ModelLifecycle, ModelSettings, SynthesisSettings, TtsBackend,
};
use genie_tts_providers::ProviderRegistry;

use crate::translate::Translator;

/// Everything the hook and the chat command share: configuration, per-session
/// state, the model actor and the synthesizer.
pub struct GenieState {
    config: RwLock<TtsConfig>,
    store: Arc<dyn ConfigStore>,
    /// Held across mutate-and-save so saves land in mutation order.
    persist: tokio::sync::Mutex<()>,
    pub sessions: SessionStateStore,
    pub lifecycle: ModelLifecycle,
    pub synthesizer: AudioSynthesizer,
    pub translator: Translator,
}

impl GenieState {
    /// Build the state and spawn the model lifecycle actor. Must be called
    /// inside a Tokio runtime.
    pub fn new(
        config: TtsConfig,
        backend: Arc<dyn TtsBackend>,
        providers: ProviderRegistry,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let lifecycle = ModelLifecycle::spawn(backend.clone(), ModelSettings::from_config(&config));
        let synthesizer = AudioSynthesizer::new(
            backend,
            lifecycle.clone(),
            ArtifactDir::new(config.temp_dir_path()),
            SynthesisSettings::from_config(&config),
        );
        let translator = Translator::from_config(&config, providers);
        Self {
            config: RwLock::new(config),
            store,
            persist: tokio::sync::Mutex::new(()),
            sessions: SessionStateStore::new(),
            lifecycle,
            synthesizer,
            translator,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TtsConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TtsConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> TtsConfig {
        self.read().clone()
    }

    pub fn policy(&self) -> PolicyConfig {
        self.read().policy.clone()
    }

    /// Apply an admin mutation to the policy and persist the config.
    ///
    /// The in-memory change stands even if persisting fails.
    pub async fn update_policy(&self, mutate: impl FnOnce(&mut PolicyConfig)) -> Result<()> {
        let _persist = self.persist.lock().await;
        let policy = {
            let mut config = self.write();
            mutate(&mut config.policy);
            config.policy.clone()
        };

        let store = self.store.clone();
        let saved = policy.clone();
        tokio::task::spawn_blocking(move || store.save_policy(&saved))
            .await
            .map_err(|e| TtsError::Other(e.into()))??;
        info!(
            global_enable = policy.global_enable,
            enabled = policy.enabled_sessions.len(),
            disabled = policy.disabled_sessions.len(),
            "Policy updated"
        );
        Ok(())
    }

    pub fn artifacts(&self) -> &ArtifactDir {
        self.synthesizer.artifacts()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use genie_tts_core::types::SessionKey;

    use crate::testing::{FakeServer, harness, test_config};

    use super::*;

    /// Records saved policies; the first save is slow.
    #[derive(Default)]
    struct SlowFirstSave {
        saved: Mutex<Vec<PolicyConfig>>,
    }

    impl ConfigStore for SlowFirstSave {
        fn save_policy(&self, policy: &PolicyConfig) -> Result<()> {
            let first = self.saved.lock().unwrap().is_empty();
            if first {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.saved.lock().unwrap().push(policy.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_policy_persists() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(test_config(&dir), ProviderRegistry::new());

        h.state
            .update_policy(|policy| policy.disable_session(&SessionKey::user("42")))
            .await
            .unwrap();

        assert!(h.state.policy().disabled_sessions.contains(&SessionKey::user("42")));
        assert_eq!(h.store.save_count(), 1);
        let saved = h.store.last().unwrap();
        assert!(saved.disabled_sessions.contains(&SessionKey::user("42")));
        assert_eq!(h.state.artifacts().root(), dir.path().join("temp_audio"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_updates_persist_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SlowFirstSave::default());
        let state = Arc::new(GenieState::new(
            test_config(&dir),
            Arc::new(FakeServer::default()),
            ProviderRegistry::new(),
            store.clone(),
        ));

        let first = tokio::spawn({
            let state = state.clone();
            async move {
                state
                    .update_policy(|policy| policy.disable_session(&SessionKey::user("A")))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        state
            .update_policy(|policy| policy.disable_session(&SessionKey::user("B")))
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        let persisted = &saved.last().unwrap().disabled_sessions;
        assert_eq!(persisted, &state.policy().disabled_sessions);
        assert!(persisted.contains(&SessionKey::user("A")));
        assert!(persisted.contains(&SessionKey::user("B")));
    }
}
