use async_trait::async_trait;
use parley_core::{AudioClip, SessionId};

/// Why a synthesis request produced no audio. Never alters the turn it was
/// requested for.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Request(String),
    #[error("speech service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("speech service rejected the request: {0}")]
    Rejected(String),
    #[error("speech response carried no audio")]
    MissingAudio,
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
}

impl SpeechError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Status { .. } => "status",
            Self::Rejected(_) => "rejected",
            Self::MissingAudio => "missing_audio",
            Self::InvalidAudio(_) => "invalid_audio",
        }
    }
}

/// Text-to-speech side effect run after a turn completes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, session_id: &SessionId) -> Result<AudioClip, SpeechError>;

    /// Whether a cloned voice exists for this session. Unknown reads as `false`.
    async fn has_voice_sample(&self, _session_id: &SessionId) -> bool {
        false
    }
}
