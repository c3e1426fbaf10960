//! The `gentts` chat command.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use tokio::time::Instant;
use tracing::{info, warn};

use genie_tts_core::types::{AudioSource, MessageOrigin, Reply, ReplyKind, Segment};
use genie_tts_engine::lifecycle::UnloadReason;
use genie_tts_engine::{ModelState, UnloadOutcome};

use crate::command::ChatCommand;
use crate::policy::{MIN_TEXT_CHARS, PolicyGate};
use crate::state::GenieState;

/// Reference lines such as `[1] https://example.com/source`.
static REFERENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\d+\]\s*(\S.*)$").expect("static pattern"));

const HELP: &str = "Genie TTS commands

/gentts test <text> - synthesize text now
/gentts on - enable voice replies in this conversation
/gentts off - disable voice replies in this conversation
/gentts status - show settings and model state

Admin only:
/gentts globalon - voice every conversation except disabled ones
/gentts globaloff - voice only enabled conversations
/gentts load - load the voice model
/gentts unload - unload the voice model";

/// Split reference lines off `text`. Returns the remaining text, trimmed,
/// and the references in order.
pub fn split_references(text: &str) -> (String, Vec<String>) {
    let mut body = Vec::new();
    let mut references = Vec::new();
    for line in text.lines() {
        if REFERENCE_LINE.is_match(line) {
            references.push(line.trim().to_string());
        } else {
            body.push(line);
        }
    }
    (body.join("\n").trim().to_string(), references)
}

fn say(text: impl Into<String>) -> Vec<Reply> {
    vec![Reply::command_text(text)]
}

pub struct GenttsCommand {
    state: Arc<GenieState>,
}

impl GenttsCommand {
    pub fn new(state: Arc<GenieState>) -> Self {
        Self { state }
    }

    async fn test(&self, text: &str) -> Vec<Reply> {
        if !self.state.lifecycle.accepts_requests().await {
            return say("The TTS server is not ready, try again later.");
        }
        if text.trim().is_empty() {
            return say("Usage: /gentts test <text>");
        }
        let (cleaned, references) = split_references(text);
        if cleaned.chars().count() < MIN_TEXT_CHARS {
            return say("The text is too short or empty.");
        }

        let mut replies = say("Generating audio...");
        match self.synthesize_inline(&cleaned).await {
            Ok(data) => replies.push(Reply {
                kind: ReplyKind::Command,
                segments: vec![Segment::Audio {
                    audio: AudioSource::Inline { data },
                }],
            }),
            Err(e) => {
                warn!(error = %e, "Manual synthesis failed");
                let text = format!("Audio generation failed: {e}");
                replies.push(Reply::command_text(text));
                return replies;
            }
        }

        if self.state.config().show_references && !references.is_empty() {
            replies.push(Reply::command_text(format!(
                "[References]\n{}",
                references.join("\n")
            )));
        }
        replies
    }

    /// Synthesize, read the file back as base64 and delete it.
    async fn synthesize_inline(&self, text: &str) -> anyhow::Result<String> {
        let state = &self.state;
        state.lifecycle.ensure_loaded().await;
        state.lifecycle.touch();
        let artifact = state.synthesizer.synthesize(text).await?;
        let read = tokio::fs::read(&artifact.path).await;
        state.artifacts().remove_now(&artifact.path).await;
        Ok(BASE64.encode(read?))
    }

    async fn set_session(&self, origin: &MessageOrigin, enable: bool) -> Vec<Reply> {
        let key = origin.session_key();
        let saved = self
            .state
            .update_policy(|policy| {
                if enable {
                    policy.enable_session(&key);
                } else {
                    policy.disable_session(&key);
                }
            })
            .await;
        let mut text = if enable {
            "Voice replies enabled for this conversation.".to_string()
        } else {
            "Voice replies disabled for this conversation.".to_string()
        };
        if let Err(e) = saved {
            warn!(session = %key, error = %e, "Failed to persist session setting");
            text.push_str(&format!(" (not saved: {e})"));
        }
        say(text)
    }

    async fn set_global(&self, enable: bool) -> Vec<Reply> {
        let saved = self
            .state
            .update_policy(|policy| policy.global_enable = enable)
            .await;
        let mut text = if enable {
            "Voice replies enabled globally (blacklist mode).".to_string()
        } else {
            "Voice replies disabled globally (whitelist mode).".to_string()
        };
        if let Err(e) = saved {
            warn!(error = %e, "Failed to persist global mode");
            text.push_str(&format!(" (not saved: {e})"));
        }
        say(text)
    }

    async fn status(&self, origin: &MessageOrigin) -> Vec<Reply> {
        let config = self.state.config();
        let policy = &config.policy;
        let key = origin.session_key();
        let enabled = PolicyGate::is_session_eligible(policy, &key);

        let mode = if policy.global_enable {
            "blacklist (on by default)"
        } else {
            "whitelist (off by default)"
        };
        let limit = if policy.text_limit > 0 {
            format!("{} chars", policy.text_limit)
        } else {
            "unlimited".to_string()
        };
        let last = self
            .state
            .sessions
            .get(&key)
            .and_then(|s| s.last_synthesis)
            .map(|at| {
                let secs = Instant::now().duration_since(at).as_secs();
                format!("\nLast voiced: {secs}s ago")
            })
            .unwrap_or_default();

        let snapshot = self.state.lifecycle.snapshot().await;
        let model = match snapshot.state {
            ModelState::Loaded { .. } => {
                let idle = snapshot.idle_for.map(|d| d.as_secs()).unwrap_or(0);
                format!("loaded, idle {idle}s")
            }
            ModelState::Loading => "loading".to_string(),
            ModelState::Unloading { .. } => "unloading".to_string(),
            ModelState::Unloaded(UnloadReason::Idle) => {
                "unloaded (idle, reloads on demand)".to_string()
            }
            ModelState::Unloaded(UnloadReason::Manual) => "unloaded by admin".to_string(),
            ModelState::Unloaded(UnloadReason::LoadFailed) => "load failed".to_string(),
            ModelState::Unloaded(UnloadReason::NeverLoaded) => "not loaded".to_string(),
        };

        say(format!(
            "Genie TTS status\n\n\
             Mode: {mode}\n\
             This conversation: {}\n\
             Probability: {}\n\
             Length limit: {limit}\n\
             Cooldown: {}s{last}\n\
             Model: {} ({model})\n\
             Server: {}",
            if enabled { "enabled" } else { "disabled" },
            policy.prob,
            policy.cooldown,
            snapshot.character_name,
            config.base_url(),
        ))
    }

    async fn load(&self) -> Vec<Reply> {
        if self.state.lifecycle.initialize().await {
            say("Voice model loaded.")
        } else {
            say("Voice model failed to load, check the server logs.")
        }
    }

    async fn unload(&self) -> Vec<Reply> {
        match self.state.lifecycle.unload().await {
            UnloadOutcome::Unloaded => say("Voice model unloaded."),
            UnloadOutcome::NotLoaded => say("Voice model is not loaded."),
            UnloadOutcome::Busy => say("Voice model is loading or unloading, try again shortly."),
            UnloadOutcome::Failed => say("Voice model unload failed, it is still loaded."),
        }
    }
}

#[async_trait]
impl ChatCommand for GenttsCommand {
    fn name(&self) -> &str {
        "gentts"
    }

    fn description(&self) -> &str {
        "Genie TTS voice replies"
    }

    async fn execute(&self, origin: &MessageOrigin, args: &str) -> anyhow::Result<Vec<Reply>> {
        let (sub, rest) = match args.trim().split_once(char::is_whitespace) {
            Some((sub, rest)) => (sub, rest.trim()),
            None => (args.trim(), ""),
        };
        let sub = sub.to_lowercase();
        let admin_only = matches!(sub.as_str(), "globalon" | "globaloff" | "load" | "unload");
        if admin_only && !origin.is_admin {
            info!(sender = %origin.sender_id, subcommand = %sub, "Admin command refused");
            return Ok(say("Permission denied: admins only."));
        }

        let replies = match sub.as_str() {
            "test" => self.test(rest).await,
            "on" => self.set_session(origin, true).await,
            "off" => self.set_session(origin, false).await,
            "status" => self.status(origin).await,
            "globalon" => self.set_global(true).await,
            "globaloff" => self.set_global(false).await,
            "load" => self.load().await,
            "unload" => self.unload().await,
            _ => say(HELP),
        };
        Ok(replies)
    }
}
