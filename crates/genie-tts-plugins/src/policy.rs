//! Decides whether a reply gets voiced.
//!
//! Gates run in a fixed order and stop at the first rejection: session
//! eligibility, minimum length, probability, length limit, cooldown. The
//! gate never mutates state; callers record a synthesis only after it
//! succeeds.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use genie_tts_core::config::PolicyConfig;
use genie_tts_core::session::SessionState;
use genie_tts_core::types::SessionKey;

/// Shortest text, in characters, worth synthesizing.
pub const MIN_TEXT_CHARS: usize = 2;

/// Why a reply was not voiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SessionDisabled,
    TooShort,
    Probability,
    TooLong { chars: usize, limit: usize },
    Cooldown { remaining: Duration },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SessionDisabled => f.write_str("session disabled"),
            SkipReason::TooShort => f.write_str("text too short"),
            SkipReason::Probability => f.write_str("probability gate"),
            SkipReason::TooLong { chars, limit } => write!(f, "text too long ({chars} > {limit})"),
            SkipReason::Cooldown { remaining } => {
                write!(f, "cooling down ({:.1}s left)", remaining.as_secs_f64())
            }
        }
    }
}

pub struct PolicyGate;

impl PolicyGate {
    /// Blacklist mode: everyone not disabled. Whitelist mode: only enabled.
    pub fn is_session_eligible(policy: &PolicyConfig, key: &SessionKey) -> bool {
        if policy.global_enable {
            !policy.disabled_sessions.contains(key)
        } else {
            policy.enabled_sessions.contains(key)
        }
    }

    /// Run every gate with a fresh random draw.
    pub fn should_synthesize(
        policy: &PolicyConfig,
        key: &SessionKey,
        session: &SessionState,
        text: &str,
        now: Instant,
    ) -> Result<(), SkipReason> {
        Self::check(policy, key, session, text, now, rand::random::<f64>())
    }

    /// Run every gate with `draw` as the probability sample in [0, 1).
    pub fn check(
        policy: &PolicyConfig,
        key: &SessionKey,
        session: &SessionState,
        text: &str,
        now: Instant,
        draw: f64,
    ) -> Result<(), SkipReason> {
        if !Self::is_session_eligible(policy, key) {
            return Err(SkipReason::SessionDisabled);
        }

        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return Err(SkipReason::TooShort);
        }

        // A zero or NaN probability must never pass, even on a draw of exactly 0.
        if policy.prob.is_nan() || policy.prob <= 0.0 || draw > policy.prob {
            return Err(SkipReason::Probability);
        }

        if policy.text_limit > 0 {
            let chars = text.chars().count();
            if chars > policy.text_limit {
                return Err(SkipReason::TooLong {
                    chars,
                    limit: policy.text_limit,
                });
            }
        }

        if policy.cooldown > 0 {
            if let Some(last) = session.last_synthesis {
                let cooldown = Duration::from_secs(policy.cooldown);
                let elapsed = now.saturating_duration_since(last);
                if elapsed < cooldown {
                    return Err(SkipReason::Cooldown {
                        remaining: cooldown - elapsed,
                    });
                }
            }
        }

        Ok(())
    }
}
