use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable identifier for a conversation scope.
///
/// Group conversations are keyed `group_<id>`, direct messages `user_<id>`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn group(group_id: &str) -> Self {
        Self(format!("group_{group_id}"))
    }

    pub fn user(user_id: &str) -> Self {
        Self(format!("user_{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Where a message came from, as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub sender_id: String,
    /// Admin permission as decided by the host.
    #[serde(default)]
    pub is_admin: bool,
}

impl MessageOrigin {
    pub fn direct(sender_id: impl Into<String>) -> Self {
        Self {
            group_id: None,
            sender_id: sender_id.into(),
            is_admin: false,
        }
    }

    /// Group id wins over the sender id; an empty group id counts as none.
    pub fn session_key(&self) -> SessionKey {
        match self.group_id.as_deref().filter(|g| !g.is_empty()) {
            Some(gid) => SessionKey::group(gid),
            None => SessionKey::user(&self.sender_id),
        }
    }
}

/// Classification of an outgoing reply, supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Text generated by the LLM; eligible for voice conversion.
    LlmResult,
    /// Output of a chat command.
    Command,
    /// Anything else the host sends.
    Plain,
}

/// Audio payload of an [`Segment::Audio`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AudioSource {
    File { path: PathBuf },
    /// Base64-encoded WAV bytes.
    Inline { data: String },
}

/// One element of a reply's content sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Audio { audio: AudioSource },
    Image { url: String },
    Other { data: serde_json::Value },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    pub fn audio_file(path: impl Into<PathBuf>) -> Self {
        Segment::Audio {
            audio: AudioSource::File { path: path.into() },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An outgoing reply: a classified sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub kind: ReplyKind,
    pub segments: Vec<Segment>,
}

impl Reply {
    pub fn llm(segments: Vec<Segment>) -> Self {
        Self {
            kind: ReplyKind::LlmResult,
            segments,
        }
    }

    pub fn command_text(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Command,
            segments: vec![Segment::text(text)],
        }
    }

    /// Concatenate all text segments with single spaces, trimmed.
    pub fn plain_text(&self) -> String {
        let joined: Vec<&str> = self.segments.iter().filter_map(Segment::as_text).collect();
        joined.join(" ").trim().to_string()
    }

    /// Indices of every text segment, in order.
    pub fn text_indices(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_text().is_some())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Payload of the `MessageSending` hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub origin: MessageOrigin,
    pub reply: Reply,
}
