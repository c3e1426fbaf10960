//! Plugin manager: collects plugins and drives their lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use genie_tts_core::types::{MessageOrigin, OutgoingMessage, Reply};

use crate::api::PluginApi;
use crate::command::CommandRegistry;
use crate::hooks::{HookContext, HookRegistry, HookResult};
use crate::{HookEvent, Plugin};

/// Manages plugin lifecycle: registration, start, message flow, teardown.
pub struct PluginManager {
    plugins: Vec<Box<dyn Plugin>>,
    hooks: Arc<HookRegistry>,
    commands: CommandRegistry,
    plugin_ids: HashSet<String>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            hooks: Arc::new(HookRegistry::new()),
            commands: CommandRegistry::new(),
            plugin_ids: HashSet::new(),
        }
    }

    /// Add a plugin. Returns an error if a plugin with the same ID is already registered.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> anyhow::Result<()> {
        let id = plugin.id().to_string();
        if !self.plugin_ids.insert(id.clone()) {
            anyhow::bail!("Duplicate plugin ID: {id}");
        }
        info!(plugin_id = %id, plugin_name = %plugin.name(), "Plugin added");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Call every plugin's `register` and apply what it queued.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            info!(plugin_id = %plugin.id(), "Initializing plugin");
            let mut api = PluginApi::new();
            plugin.register(&mut api);

            for (event, handler) in api.take_hooks() {
                self.hooks.register(event, handler).await;
            }
            for command in api.take_commands() {
                self.commands.register(command);
            }
        }
        Ok(())
    }

    /// Start all plugins in registration order, then fire `HostStart`.
    pub async fn start(&self) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            plugin.start().await?;
            info!(plugin_id = %plugin.id(), "Plugin started");
        }
        self.hooks
            .fire(HookEvent::HostStart, HookContext::host(), serde_json::Value::Null)
            .await;
        Ok(())
    }

    /// Fire `HostStop`, then terminate plugins in reverse order. Every plugin
    /// is terminated even if an earlier one fails.
    pub async fn terminate(&self) {
        self.hooks
            .fire(HookEvent::HostStop, HookContext::host(), serde_json::Value::Null)
            .await;
        for plugin in self.plugins.iter().rev() {
            match plugin.terminate().await {
                Ok(()) => info!(plugin_id = %plugin.id(), "Plugin terminated"),
                Err(e) => warn!(plugin_id = %plugin.id(), error = %e, "Plugin teardown failed"),
            }
        }
    }

    /// Run an outgoing reply through the `MessageSending` chain.
    ///
    /// Returns the reply to send, or `None` if a handler cancelled it. A
    /// payload that no longer parses falls back to the original reply.
    pub async fn prepare_outgoing(&self, origin: &MessageOrigin, reply: Reply) -> Option<Reply> {
        let message = OutgoingMessage {
            origin: origin.clone(),
            reply,
        };
        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode outgoing message");
                return Some(message.reply);
            }
        };

        let ctx = HookContext::for_session(origin.session_key());
        let result = self
            .hooks
            .fire_or_cancel(HookEvent::MessageSending, ctx, payload)
            .await;
        match result {
            Ok(out) => match serde_json::from_value::<OutgoingMessage>(out) {
                Ok(modified) => Some(modified.reply),
                Err(e) => {
                    warn!(error = %e, "Hook returned an invalid message, sending original");
                    Some(message.reply)
                }
            },
            Err(reason) => {
                info!(%reason, "Outgoing message cancelled");
                None
            }
        }
    }

    /// Fire `MessageReceived` for an inbound message. Returns `false` if a
    /// handler cancelled it.
    pub async fn message_received(&self, origin: &MessageOrigin, text: &str) -> bool {
        let payload = serde_json::json!({
            "session": origin.session_key().as_str(),
            "sender_id": origin.sender_id,
            "text": text,
        });
        let ctx = HookContext::for_session(origin.session_key());
        let result = self
            .hooks
            .fire(HookEvent::MessageReceived, ctx, payload)
            .await;
        match result {
            HookResult::Cancel(reason) => {
                info!(%reason, "Inbound message dropped");
                false
            }
            _ => true,
        }
    }

    /// Fire `MessageSent` once a reply has been delivered.
    pub async fn message_sent(&self, origin: &MessageOrigin, reply: &Reply) {
        let message = OutgoingMessage {
            origin: origin.clone(),
            reply: reply.clone(),
        };
        match serde_json::to_value(&message) {
            Ok(payload) => {
                let ctx = HookContext::for_session(origin.session_key());
                self.hooks.fire(HookEvent::MessageSent, ctx, payload).await;
            }
            Err(e) => warn!(error = %e, "Failed to encode sent message"),
        }
    }

    /// Get a reference to the shared hook registry.
    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.clone()
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn plugin_ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use genie_tts_core::types::{ReplyKind, Segment};

    use super::*;

    struct TestPlugin {
        id: String,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl TestPlugin {
        fn boxed(id: &str) -> Box<Self> {
            Box::new(Self {
                id: id.into(),
                starts: Arc::default(),
                stops: Arc::default(),
            })
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "Test Plugin"
        }

        fn register(&self, api: &mut PluginApi) {
            api.register_hook(
                HookEvent::MessageSending,
                Box::new(|_ctx, mut data| {
                    Box::pin(async move {
                        let segment = serde_json::json!({"type": "text", "text": "rewritten"});
                        data["reply"]["segments"] = serde_json::json!([segment]);
                        Ok(HookResult::Modified(data))
                    })
                }),
            );
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn terminate(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("already stopped")
        }
    }

    #[test]
    fn test_duplicate_plugin_id() {
        let mut mgr = PluginManager::new();
        mgr.add_plugin(TestPlugin::boxed("dup")).unwrap();
        let result = mgr.add_plugin(TestPlugin::boxed("dup"));
        assert!(result.unwrap_err().to_string().contains("Duplicate plugin ID"));
        assert_eq!(mgr.plugin_ids(), vec!["dup"]);
    }

    #[tokio::test]
    async fn test_lifecycle_fan_out() {
        let first = TestPlugin::boxed("first");
        let second = TestPlugin::boxed("second");
        let (starts, stops) = (first.starts.clone(), second.stops.clone());

        let mut mgr = PluginManager::new();
        mgr.add_plugin(first).unwrap();
        mgr.add_plugin(second).unwrap();
        mgr.initialize().await.unwrap();
        assert_eq!(mgr.hooks().count(HookEvent::MessageSending).await, 2);

        mgr.start().await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        // Failing teardown of one plugin does not skip the others.
        mgr.terminate().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_outgoing_applies_hooks() {
        let mut mgr = PluginManager::new();
        mgr.add_plugin(TestPlugin::boxed("rewrite")).unwrap();
        mgr.initialize().await.unwrap();

        let reply = Reply::llm(vec![Segment::text("original")]);
        let out = mgr
            .prepare_outgoing(&MessageOrigin::direct("42"), reply)
            .await
            .unwrap();
        assert_eq!(out.kind, ReplyKind::LlmResult);
        assert_eq!(out.plain_text(), "rewritten");
    }

    #[tokio::test]
    async fn test_prepare_outgoing_cancelled() {
        let mgr = PluginManager::new();
        mgr.hooks()
            .register(
                HookEvent::MessageSending,
                Box::new(|_ctx, _data| Box::pin(async { Ok(HookResult::Cancel("muted".into())) })),
            )
            .await;
        let reply = Reply::llm(vec![Segment::text("hi")]);
        assert!(mgr.prepare_outgoing(&MessageOrigin::direct("42"), reply).await.is_none());
    }

    #[tokio::test]
    async fn test_inbound_and_sent_events() {
        let mgr = PluginManager::new();
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        mgr.hooks()
            .register(
                HookEvent::MessageReceived,
                Box::new(|_ctx, data| {
                    Box::pin(async move {
                        if data["text"] == "spam" {
                            Ok(HookResult::Cancel("filtered".into()))
                        } else {
                            Ok(HookResult::Continue)
                        }
                    })
                }),
            )
            .await;
        let log = sent.clone();
        mgr.hooks()
            .register(
                HookEvent::MessageSent,
                Box::new(move |ctx, data| {
                    let log = log.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push((ctx.session, data));
                        Ok(HookResult::Continue)
                    })
                }),
            )
            .await;

        let origin = MessageOrigin::direct("42");
        assert!(mgr.message_received(&origin, "hello").await);
        assert!(!mgr.message_received(&origin, "spam").await);

        let done = Reply::command_text("done");
        mgr.message_sent(&origin, &done).await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_ref().map(|k| k.as_str()), Some("user_42"));
        assert_eq!(sent[0].1["origin"]["sender_id"], "42");
    }
}
