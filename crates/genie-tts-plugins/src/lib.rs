//! Plugin SDK and the Genie TTS plugin.
//!
//! Plugins register message hooks and chat commands with the host. The
//! bundled [`GenieTtsPlugin`] turns generated text replies into voice.

use async_trait::async_trait;

pub mod api;
pub mod command;
pub mod genie;
pub mod gentts;
pub mod hooks;
pub mod manager;
pub mod policy;
pub mod rewriter;
pub mod state;
pub mod translate;

#[cfg(test)]
pub(crate) mod testing;

pub use api::PluginApi;
pub use command::{ChatCommand, CommandRegistry};
pub use genie::GenieTtsPlugin;
pub use hooks::{HookContext, HookRegistry, HookResult};
pub use manager::PluginManager;
pub use policy::{PolicyGate, SkipReason};
pub use rewriter::{ResultRewriter, RewriteOutcome};
pub use state::GenieState;
pub use translate::Translator;

/// Host events that plugins can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    MessageReceived,
    /// Fired before every outgoing reply; handlers may rewrite it.
    MessageSending,
    MessageSent,
    HostStart,
    HostStop,
}

/// The core plugin trait.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Plugin identifier.
    fn id(&self) -> &str;

    /// Human-readable plugin name.
    fn name(&self) -> &str;

    /// Register hooks and commands with the host.
    fn register(&self, api: &mut PluginApi);

    /// Called once after registration, before any message flows.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the host shuts down or unloads the plugin.
    async fn terminate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
