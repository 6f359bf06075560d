use parley_core::{ChatTurn, ClientError, SessionId, Source};

use crate::connection::ConnectionState;

/// Everything a consumer renders, published on a watch channel. Each value is
/// internally consistent: `current_text` is always a prefix of the final
/// answer, and `is_streaming == false` is never published before the final
/// text.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSnapshot {
    pub session_id: SessionId,
    pub revision: u64,
    pub connection_state: ConnectionState,
    pub is_connected: bool,
    pub is_streaming: bool,
    pub current_text: String,
    pub current_sources: Vec<Source>,
    pub enhanced_query: Option<String>,
    pub suggested_questions: Vec<String>,
    pub error: Option<ClientError>,
    pub speech_enabled: bool,
    /// The speech service holds a cloned voice for this session.
    pub has_voice_sample: bool,
    pub synthesizing: bool,
    pub turns: Vec<ChatTurn>,
}

impl ChatSnapshot {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            revision: 0,
            connection_state: ConnectionState::Connecting,
            is_connected: false,
            is_streaming: false,
            current_text: String::new(),
            current_sources: Vec::new(),
            enhanced_query: None,
            suggested_questions: Vec::new(),
            error: None,
            speech_enabled: false,
            has_voice_sample: false,
            synthesizing: false,
            turns: Vec::new(),
        }
    }

    /// Most recent assistant entry, streaming or finished.
    pub fn last_assistant(&self) -> Option<&ChatTurn> {
        self.turns.iter().rev().find(|t| t.is_assistant())
    }
}
