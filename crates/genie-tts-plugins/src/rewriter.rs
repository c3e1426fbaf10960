//! Replaces the text of generated replies with synthesized voice.
//!
//! The reply is only touched after synthesis succeeds, so a failure leaves
//! the original text to be sent as is.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info};

use genie_tts_core::error::TtsError;
use genie_tts_core::types::{MessageOrigin, Reply, ReplyKind, Segment};

use crate::policy::{PolicyGate, SkipReason};
use crate::state::GenieState;

/// What happened to a reply.
#[derive(Debug)]
pub enum RewriteOutcome {
    /// The model was never brought up (or was unloaded by an admin).
    NotInitialized,
    /// Not an LLM reply.
    NotGenerated,
    Skipped(SkipReason),
    /// Synthesis failed; the reply is unchanged.
    Failed(TtsError),
    Voiced { path: PathBuf, captioned: bool },
}

pub struct ResultRewriter {
    state: Arc<GenieState>,
}

impl ResultRewriter {
    pub fn new(state: Arc<GenieState>) -> Self {
        Self { state }
    }

    /// Voice `reply` in place if every gate passes.
    pub async fn decorate(&self, origin: &MessageOrigin, reply: &mut Reply) -> RewriteOutcome {
        let state = &self.state;
        if !state.lifecycle.accepts_requests().await {
            return RewriteOutcome::NotInitialized;
        }
        if reply.kind != ReplyKind::LlmResult {
            return RewriteOutcome::NotGenerated;
        }

        let key = origin.session_key();
        let text = reply.plain_text();
        let session = state.sessions.get_or_create(&key);
        let now = Instant::now();
        let gate = PolicyGate::should_synthesize(&state.policy(), &key, &session, &text, now);
        if let Err(reason) = gate {
            debug!(session = %key, %reason, "Reply not voiced");
            return RewriteOutcome::Skipped(reason);
        }

        state.lifecycle.ensure_loaded().await;
        state.lifecycle.touch();

        let artifact = match state.synthesizer.synthesize(&text).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(session = %key, error = %e, "Voice conversion failed, sending text");
                return RewriteOutcome::Failed(e);
            }
        };
        state.sessions.record_synthesis(&key, now, &text);

        // Everything before the first text segment is kept, so its index is
        // still valid once the text is gone.
        let first = reply.text_indices().first().copied().unwrap_or(0);
        reply.segments.retain(|segment| segment.as_text().is_none());
        let first = first.min(reply.segments.len());
        let audio = Segment::audio_file(&artifact.path);
        reply.segments.insert(first, audio);

        let mut captioned = false;
        if state.config().send_text_with_audio {
            if let Some(caption) = state.translator.caption(&text).await {
                reply.segments.insert(first + 1, Segment::text(caption));
                captioned = true;
            }
        }

        let delay = state.config().cleanup_delay();
        let path = artifact.path.clone();
        state.artifacts().schedule_removal(path, delay);

        info!(
            session = %key,
            path = %artifact.path.display(),
            chars = text.chars().count(),
            captioned,
            "Reply voiced"
        );
        RewriteOutcome::Voiced {
            path: artifact.path,
            captioned,
        }
    }
}
