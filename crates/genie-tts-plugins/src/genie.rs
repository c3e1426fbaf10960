//! Genie TTS plugin: voices LLM replies through a remote Genie TTS server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use genie_tts_core::config::{ConfigStore, TtsConfig};
use genie_tts_core::types::OutgoingMessage;
use genie_tts_engine::HttpTtsBackend;
use genie_tts_providers::ProviderRegistry;

use crate::api::PluginApi;
use crate::gentts::GenttsCommand;
use crate::hooks::HookResult;
use crate::rewriter::{ResultRewriter, RewriteOutcome};
use crate::state::GenieState;
use crate::{HookEvent, Plugin};

pub const PLUGIN_ID: &str = "genie_tts";

pub struct GenieTtsPlugin {
    state: Arc<GenieState>,
    rewriter: Arc<ResultRewriter>,
    cancel: CancellationToken,
    idle_checker: Mutex<Option<JoinHandle<()>>>,
}

impl GenieTtsPlugin {
    pub fn new(state: Arc<GenieState>) -> Self {
        Self {
            rewriter: Arc::new(ResultRewriter::new(state.clone())),
            state,
            cancel: CancellationToken::new(),
            idle_checker: Mutex::new(None),
        }
    }

    /// Build the plugin against the HTTP server and providers named in
    /// `config`. Must be called inside a Tokio runtime.
    pub fn from_config(config: TtsConfig, store: Arc<dyn ConfigStore>) -> Self {
        let backend = Arc::new(HttpTtsBackend::new(&config.base_url()));
        let providers =
            ProviderRegistry::from_config(&config.providers, config.default_provider.as_deref());
        Self::new(Arc::new(GenieState::new(config, backend, providers, store)))
    }

    pub fn state(&self) -> &Arc<GenieState> {
        &self.state
    }
}

async fn decorate_payload(
    rewriter: &ResultRewriter,
    payload: serde_json::Value,
) -> anyhow::Result<HookResult> {
    let mut message: OutgoingMessage = serde_json::from_value(payload)?;
    match rewriter.decorate(&message.origin, &mut message.reply).await {
        RewriteOutcome::Voiced { .. } => Ok(HookResult::Modified(serde_json::to_value(&message)?)),
        outcome => {
            debug!(?outcome, "Outgoing reply left as text");
            Ok(HookResult::Continue)
        }
    }
}

#[async_trait]
impl Plugin for GenieTtsPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Genie TTS"
    }

    fn register(&self, api: &mut PluginApi) {
        let rewriter = self.rewriter.clone();
        api.register_hook(
            HookEvent::MessageSending,
            Box::new(move |_ctx, data| {
                let rewriter = rewriter.clone();
                Box::pin(async move { decorate_payload(&rewriter, data).await })
            }),
        );
        let command = GenttsCommand::new(self.state.clone());
        api.register_command(Arc::new(command));
    }

    /// Bring the model up in the background and start the idle checker.
    async fn start(&self) -> anyhow::Result<()> {
        self.state.artifacts().ensure().await?;

        let lifecycle = self.state.lifecycle.clone();
        tokio::spawn(async move {
            if !lifecycle.initialize().await {
                warn!(
                    "Initial model load failed, voice replies stay off until an admin runs \
                     `gentts load`"
                );
            }
        });

        let checker = self.state.lifecycle.spawn_idle_checker(self.cancel.clone());
        *self.idle_checker.lock().unwrap_or_else(|e| e.into_inner()) = checker;
        info!(
            server = %self.state.config().base_url(),
            temp_dir = %self.state.artifacts().root().display(),
            "Genie TTS started"
        );
        Ok(())
    }

    /// Stop the idle checker and delete every temporary audio file.
    async fn terminate(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let checker = self
            .idle_checker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = checker {
            if let Err(e) = handle.await {
                warn!(error = %e, "Idle checker ended abnormally");
            }
        }
        let removed = self.state.artifacts().sweep().await?;
        info!(removed, "Genie TTS terminated");
        Ok(())
    }
}
