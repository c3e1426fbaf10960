use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS model is not loaded")]
    NotReady,

    #[error("Text to synthesize is empty")]
    EmptyInput,

    #[error("TTS request failed: {0}")]
    RequestFailed(String),

    #[error("TTS server unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("No translation provider available")]
    TranslationUnavailable,

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TtsError {
    /// Whether a synthesis attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TtsError::RequestFailed(_) | TtsError::RemoteUnavailable(_) | TtsError::Audio(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
