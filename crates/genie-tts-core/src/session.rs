//! Per-session synthesis state.
//!
//! Entries are created lazily on first lookup and live for the process
//! lifetime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::debug;

use crate::types::SessionKey;

/// Mutable state tracked per conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// When audio was last produced for this session. `None` means never.
    pub last_synthesis: Option<Instant>,
    pub last_text: String,
}

/// In-memory map of session state, safe under concurrent first-touch.
#[derive(Default)]
pub struct SessionStateStore {
    sessions: Mutex<HashMap<SessionKey, SessionState>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionState>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the session, inserting a default entry if absent.
    pub fn get_or_create(&self, key: &SessionKey) -> SessionState {
        let mut map = self.lock();
        map.entry(key.clone())
            .or_insert_with(|| {
                debug!(session = %key, "Session state created");
                SessionState::default()
            })
            .clone()
    }

    /// Snapshot of the session without creating it.
    pub fn get(&self, key: &SessionKey) -> Option<SessionState> {
        self.lock().get(key).cloned()
    }

    /// Record a successful synthesis for the session.
    pub fn record_synthesis(&self, key: &SessionKey, at: Instant, text: &str) {
        let mut map = self.lock();
        let state = map.entry(key.clone()).or_default();
        state.last_synthesis = Some(at);
        state.last_text = text.to_string();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
