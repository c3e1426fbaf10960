//! Text-completion provider abstraction.
//!
//! Providers implement [`CompletionProvider`] to answer single-turn,
//! non-conversational prompts. The TTS plugin only uses them to translate
//! reply text for captions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use genie_tts_core::config::ProviderConfig;

pub mod openai;

pub use openai::OpenAiCompatProvider;

/// A single-turn text completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier as configured (e.g. "openai", "deepseek").
    fn id(&self) -> &str;

    /// Complete `prompt` with an optional `system` instruction. Returns the
    /// raw assistant text.
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Ordered set of providers with an optional default.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CompletionProvider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build OpenAI-compatible providers from configuration, in order.
    pub fn from_config(configs: &[ProviderConfig], default_id: Option<&str>) -> Self {
        let mut registry = Self::new();
        for config in configs {
            let provider = OpenAiCompatProvider::from_config(config);
            registry.register(Arc::new(provider));
        }
        registry.default_id = default_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);
        registry
    }

    /// Append a provider. Duplicate ids are ignored.
    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        if self.get(provider.id()).is_some() {
            warn!(provider = provider.id(), "Duplicate provider id ignored");
            return;
        }
        self.providers.push(provider);
    }

    pub fn set_default(&mut self, id: Option<String>) {
        self.default_id = id;
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// The provider named as default, if it is registered.
    pub fn default_provider(&self) -> Option<Arc<dyn CompletionProvider>> {
        self.default_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn first(&self) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.first().cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Pick a provider: `preferred` when registered, then the default, then
    /// the first one available.
    pub fn resolve(&self, preferred: &str) -> Option<Arc<dyn CompletionProvider>> {
        let preferred = preferred.trim();
        if !preferred.is_empty() {
            if let Some(provider) = self.get(preferred) {
                info!(provider = preferred, "Using configured provider");
                return Some(provider);
            }
            warn!(provider = preferred, "Configured provider not found, falling back");
        }
        if let Some(provider) = self.default_provider() {
            info!(provider = provider.id(), "Using default provider");
            return Some(provider);
        }
        let provider = self.first()?;
        info!(provider = provider.id(), "Using first available provider");
        Some(provider)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Provider that echoes a canned answer or fails.
    pub struct StaticProvider {
        pub id: String,
        pub answer: Option<String>,
    }

    impl StaticProvider {
        pub fn answering(id: &str, answer: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                answer: Some(answer.into()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for StaticProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
            self.answer
                .clone()
                .ok_or_else(|| anyhow::anyhow!("{} is unavailable", self.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::StaticProvider;
    use super::*;

    fn registry(default_id: Option<&str>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(StaticProvider::answering("alpha", "a"));
        registry.register(StaticProvider::answering("beta", "b"));
        registry.set_default(default_id.map(String::from));
        registry
    }

    #[test]
    fn test_resolve_prefers_configured_id() {
        let registry = registry(Some("alpha"));
        assert_eq!(registry.resolve("beta").unwrap().id(), "beta");
    }

    #[test]
    fn test_resolve_unknown_id_falls_back_to_default() {
        let registry = registry(Some("beta"));
        assert_eq!(registry.resolve("gamma").unwrap().id(), "beta");
        assert_eq!(registry.resolve("  ").unwrap().id(), "beta");
    }

    #[test]
    fn test_resolve_without_default_uses_first() {
        assert_eq!(registry(None).resolve("").unwrap().id(), "alpha");
        // A default that is not registered is skipped.
        assert_eq!(registry(Some("missing")).resolve("").unwrap().id(), "alpha");
    }

    #[test]
    fn test_resolve_empty_registry() {
        assert!(ProviderRegistry::new().resolve("alpha").is_none());
    }

    #[test]
    fn test_duplicate_ids_ignored() {
        let mut registry = registry(None);
        let duplicate = StaticProvider::answering("alpha", "other");
        registry.register(duplicate);
        assert_eq!(registry.ids(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_from_config_keeps_order_and_default() {
        let configs = vec![
            ProviderConfig {
                id: "deepseek".into(),
                base_url: "https://api.deepseek.com".into(),
                api_key: Some("sk-test".into()),
                api_key_env: None,
                model: "deepseek-chat".into(),
            },
            ProviderConfig {
                id: "local".into(),
                base_url: "http://localhost:11434".into(),
                api_key: None,
                api_key_env: None,
                model: "qwen2.5".into(),
            },
        ];
        let registry = ProviderRegistry::from_config(&configs, Some(" local "));
        assert_eq!(registry.ids(), vec!["deepseek", "local"]);
        assert_eq!(registry.default_provider().unwrap().id(), "local");

        let registry = ProviderRegistry::from_config(&configs, Some(""));
        assert!(registry.default_provider().is_none());
    }
}
