//! Best-effort translation of voiced replies for a text caption.

use std::sync::Arc;

use tracing::{info, warn};

use genie_tts_core::config::TtsConfig;
use genie_tts_core::error::{Result, TtsError};
use genie_tts_providers::{CompletionProvider, ProviderRegistry};

/// Prefix of the caption segment placed after the audio.
pub const CAPTION_PREFIX: &str = "\n[Translation]\n";

pub struct Translator {
    providers: ProviderRegistry,
    provider_id: String,
    language: String,
}

impl Translator {
    pub fn new(providers: ProviderRegistry, provider_id: &str, language: &str) -> Self {
        Self {
            providers,
            provider_id: provider_id.trim().to_string(),
            language: language.to_string(),
        }
    }

    pub fn from_config(config: &TtsConfig, providers: ProviderRegistry) -> Self {
        Self::new(
            providers,
            &config.translation_provider_id,
            &config.translation_language,
        )
    }

    fn provider(&self) -> Result<Arc<dyn CompletionProvider>> {
        self.providers
            .resolve(&self.provider_id)
            .ok_or(TtsError::TranslationUnavailable)
    }

    fn instruction(&self) -> String {
        format!(
            "You are a professional translator. Translate the user's text into {}. \
             Reply with the translation only, without any explanation.",
            self.language
        )
    }

    /// Translate `text`, or return an empty string if anything goes wrong.
    pub async fn translate(&self, text: &str) -> String {
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "No translation provider available");
                return String::new();
            }
        };

        match provider.complete(&self.instruction(), text).await {
            Ok(answer) => {
                let translation = answer.trim().to_string();
                info!(
                    provider = provider.id(),
                    chars = translation.chars().count(),
                    "Translation complete"
                );
                translation
            }
            Err(e) => {
                warn!(provider = provider.id(), error = %e, "Translation failed");
                String::new()
            }
        }
    }

    /// Caption text for a translation, or `None` when there is nothing to show.
    pub async fn caption(&self, text: &str) -> Option<String> {
        let translation = self.translate(text).await;
        (!translation.is_empty()).then(|| format!("{CAPTION_PREFIX}{translation}"))
    }
}
