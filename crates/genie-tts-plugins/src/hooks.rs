//! Hook system: ordered async handlers for host events.
//!
//! Handlers receive the event payload as JSON and may pass it through,
//! replace it for the rest of the chain, or cancel the event.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use genie_tts_core::types::SessionKey;

use crate::HookEvent;

/// Context passed to every hook handler invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Conversation the event belongs to, when there is one.
    pub session: Option<SessionKey>,
    pub timestamp: DateTime<Utc>,
}

impl HookContext {
    pub fn for_session(session: SessionKey) -> Self {
        Self {
            session: Some(session),
            timestamp: Utc::now(),
        }
    }

    pub fn host() -> Self {
        Self {
            session: None,
            timestamp: Utc::now(),
        }
    }
}

/// Result returned by a hook handler.
#[derive(Debug)]
pub enum HookResult {
    /// Keep the payload as is.
    Continue,
    /// Replace the payload for the following handlers.
    Modified(serde_json::Value),
    /// Stop the chain and drop the event.
    Cancel(String),
}

/// Future returned by a hook handler.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<HookResult>> + Send>>;

/// Async hook handler function type.
pub type HookHandler = Box<dyn Fn(HookContext, serde_json::Value) -> HookFuture + Send + Sync>;

/// Registry of hook handlers, keyed by event type.
#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookEvent, Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific hook event.
    pub async fn register(&self, event: HookEvent, handler: HookHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(event).or_default().push(handler);
    }

    /// Run the chain for `event` in registration order.
    ///
    /// Returns the final payload, or the cancel reason. A handler error is
    /// logged and the chain continues with the payload it was given.
    pub async fn fire_or_cancel(
        &self,
        event: HookEvent,
        ctx: HookContext,
        data: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let handlers = self.handlers.read().await;
        let Some(chain) = handlers.get(&event) else {
            return Ok(data);
        };

        let mut current = data;
        for handler in chain {
            match handler(ctx.clone(), current.clone()).await {
                Ok(HookResult::Continue) => {}
                Ok(HookResult::Modified(new_data)) => current = new_data,
                Ok(HookResult::Cancel(reason)) => return Err(reason),
                Err(e) => {
                    tracing::warn!(event = ?event, error = %e, "Hook handler error, continuing");
                }
            }
        }
        Ok(current)
    }

    /// Fire an event whose payload nobody needs back.
    pub async fn fire(
        &self,
        event: HookEvent,
        ctx: HookContext,
        data: serde_json::Value,
    ) -> HookResult {
        match self.fire_or_cancel(event, ctx, data).await {
            Ok(_) => HookResult::Continue,
            Err(reason) => HookResult::Cancel(reason),
        }
    }

    /// Return the number of handlers registered for a given event.
    pub async fn count(&self, event: HookEvent) -> usize {
        let handlers = self.handlers.read().await;
        handlers.get(&event).map_or(0, |v| v.len())
    }
}
