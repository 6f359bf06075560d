use crate::wire::Source;

/// Typed inbound event, one per decoded frame. Ordering contract within a turn:
///
/// (TextChunk | SourceSet | EnhancedQuery | SuggestedQuestions)* → (Completed | Failure)
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    TextChunk(String),
    SourceSet(Vec<Source>),
    EnhancedQuery(String),
    SuggestedQuestions(Vec<String>),
    Completed,
    Failure(String),
}

impl InboundEvent {
    /// Wire tag this event was decoded from.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextChunk(_) => "chunk",
            Self::SourceSet(_) => "sources",
            Self::EnhancedQuery(_) => "enhanced_query",
            Self::SuggestedQuestions(_) => "suggested_questions",
            Self::Completed => "done",
            Self::Failure(_) => "error",
        }
    }
}
