use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TurnId;
use crate::wire::Source;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Streaming,
    Complete,
    Failed,
    /// The connection dropped before the service finished the answer.
    Interrupted,
}

/// Synthesized speech attached to a finished assistant turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    pub data: Vec<u8>,
}

impl AudioClip {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One entry of the conversation record. User and assistant entries share a
/// `TurnId` so a reply can always be matched to its query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioClip>,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(id: TurnId, query: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: query.into(),
            sources: Vec::new(),
            enhanced_query: None,
            suggested_questions: Vec::new(),
            audio: None,
            status: TurnStatus::Complete,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(id: TurnId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            sources: Vec::new(),
            enhanced_query: None,
            suggested_questions: Vec::new(),
            audio: None,
            status: TurnStatus::Streaming,
            created_at: Utc::now(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_streaming(&self) -> bool {
        self.status == TurnStatus::Streaming
    }
}

/// Ordered conversation record. Only the last assistant entry may be
/// streaming.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, id: TurnId, query: impl Into<String>) {
        self.turns.push(ChatTurn::user(id, query));
    }

    /// Assistant entry for `id`, created at the end of the record on first use.
    pub fn assistant_mut(&mut self, id: &TurnId) -> &mut ChatTurn {
        let pos = self
            .turns
            .iter()
            .rposition(|t| t.is_assistant() && &t.id == id);
        let idx = match pos {
            Some(idx) => idx,
            None => {
                self.turns.push(ChatTurn::assistant(id.clone()));
                self.turns.len() - 1
            }
        };
        &mut self.turns[idx]
    }

    pub fn find_assistant(&self, id: &TurnId) -> Option<&ChatTurn> {
        self.turns.iter().rev().find(|t| t.is_assistant() && &t.id == id)
    }

    pub fn find_assistant_mut(&mut self, id: &TurnId) -> Option<&mut ChatTurn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|t| t.is_assistant() && &t.id == id)
    }

    /// Most recent enhanced query reported by any earlier assistant turn.
    pub fn last_enhanced_query(&self, before: &TurnId) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.is_assistant() && &t.id != before)
            .find_map(|t| t.enhanced_query.as_deref())
    }
}
