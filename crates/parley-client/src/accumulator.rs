//! Live state of the one answer currently streaming in.

use parley_core::{InboundEvent, Source, TurnId};
use tracing::debug;

/// Accumulated state of the turn in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnState {
    pub turn_id: TurnId,
    pub text: String,
    pub sources: Vec<Source>,
    pub enhanced_query: Option<String>,
    pub suggested_questions: Vec<String>,
    pub chunks: usize,
}

impl TurnState {
    fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            text: String::new(),
            sources: Vec::new(),
            enhanced_query: None,
            suggested_questions: Vec::new(),
            chunks: 0,
        }
    }
}

/// What applying one event did.
#[derive(Clone, Debug, PartialEq)]
pub enum AccumulatorOutcome {
    /// No live turn; the event was dropped.
    Ignored,
    /// Live state changed.
    Updated,
    /// The turn finished; live state has been cleared.
    Completed(TurnState),
    /// The service reported an error; `partial` holds what had streamed so far.
    Failed { partial: TurnState, message: String },
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    live: Option<TurnState>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh live turn, discarding whatever was there.
    pub fn begin(&mut self, turn_id: TurnId) {
        if let Some(previous) = self.live.replace(TurnState::new(turn_id)) {
            debug!(turn_id = %previous.turn_id, "discarding unfinished turn state");
        }
    }

    pub fn live(&self) -> Option<&TurnState> {
        self.live.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Drop the live turn without completing it.
    pub fn abandon(&mut self) -> Option<TurnState> {
        self.live.take()
    }

    pub fn apply(&mut self, event: InboundEvent) -> AccumulatorOutcome {
        let Some(state) = self.live.as_mut() else {
            debug!(kind = event.kind(), "event with no live turn, ignoring");
            return AccumulatorOutcome::Ignored;
        };

        match event {
            InboundEvent::TextChunk(chunk) => {
                state.text.push_str(&chunk);
                state.chunks += 1;
                AccumulatorOutcome::Updated
            }
            InboundEvent::SourceSet(sources) => {
                state.sources = sources;
                AccumulatorOutcome::Updated
            }
            InboundEvent::EnhancedQuery(query) => {
                state.enhanced_query = Some(query);
                AccumulatorOutcome::Updated
            }
            InboundEvent::SuggestedQuestions(questions) => {
                state.suggested_questions = questions;
                AccumulatorOutcome::Updated
            }
            InboundEvent::Completed => match self.live.take() {
                Some(done) => AccumulatorOutcome::Completed(done),
                None => AccumulatorOutcome::Ignored,
            },
            InboundEvent::Failure(message) => match self.live.take() {
                Some(partial) => AccumulatorOutcome::Failed { partial, message },
                None => AccumulatorOutcome::Ignored,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_accumulator() -> (StreamAccumulator, TurnId) {
        let mut acc = StreamAccumulator::new();
        let id = TurnId::new();
        acc.begin(id.clone());
        (acc, id)
    }

    #[test]
    fn chunks_concatenate_in_order() {
        let (mut acc, _) = live_accumulator();
        for part in ["The ", "ledger ", "", "was ", "sealed", "."] {
            assert_eq!(
                acc.apply(InboundEvent::TextChunk(part.into())),
                AccumulatorOutcome::Updated
            );
        }
        let state = acc.live().unwrap();
        assert_eq!(state.text, "The ledger was sealed.");
        assert_eq!(state.chunks, 6);
    }

    #[test]
    fn repeated_chunks_are_not_deduplicated() {
        let (mut acc, _) = live_accumulator();
        acc.apply(InboundEvent::TextChunk("ha".into()));
        acc.apply(InboundEvent::TextChunk("ha".into()));
        assert_eq!(acc.live().unwrap().text, "haha");
    }

    #[test]
    fn replace_once_fields_are_last_write_wins() {
        let (mut acc, _) = live_accumulator();
        acc.apply(InboundEvent::SourceSet(vec![Source::new("one")]));
        acc.apply(InboundEvent::SourceSet(vec![Source::new("two"), Source::new("three")]));
        acc.apply(InboundEvent::EnhancedQuery("first".into()));
        acc.apply(InboundEvent::EnhancedQuery("second".into()));
        acc.apply(InboundEvent::SuggestedQuestions(vec!["q1".into()]));
        acc.apply(InboundEvent::SuggestedQuestions(vec!["q2".into()]));

        let state = acc.live().unwrap();
        assert_eq!(state.sources.len(), 2);
        assert_eq!(state.sources[0].text, "two");
        assert_eq!(state.enhanced_query.as_deref(), Some("second"));
        assert_eq!(state.suggested_questions, vec!["q2".to_string()]);
    }

    #[test]
    fn completed_hands_over_and_clears() {
        let (mut acc, id) = live_accumulator();
        acc.apply(InboundEvent::TextChunk("Hi".into()));
        let AccumulatorOutcome::Completed(done) = acc.apply(InboundEvent::Completed) else {
            panic!("expected completion");
        };
        assert_eq!(done.turn_id, id);
        assert_eq!(done.text, "Hi");
        assert!(!acc.is_live());
    }

    #[test]
    fn failure_reports_partial_text() {
        let (mut acc, _) = live_accumulator();
        acc.apply(InboundEvent::TextChunk("Part".into()));
        match acc.apply(InboundEvent::Failure("model crashed".into())) {
            AccumulatorOutcome::Failed { partial, message } => {
                assert_eq!(partial.text, "Part");
                assert_eq!(message, "model crashed");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!acc.is_live());
    }

    #[test]
    fn events_without_live_turn_are_ignored() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(
            acc.apply(InboundEvent::TextChunk("stray".into())),
            AccumulatorOutcome::Ignored
        );
        assert_eq!(acc.apply(InboundEvent::Completed), AccumulatorOutcome::Ignored);

        let (mut acc, _) = live_accumulator();
        acc.apply(InboundEvent::Completed);
        assert_eq!(
            acc.apply(InboundEvent::TextChunk("late".into())),
            AccumulatorOutcome::Ignored
        );
    }

    #[test]
    fn begin_resets_state() {
        let (mut acc, _) = live_accumulator();
        acc.apply(InboundEvent::TextChunk("old".into()));
        let next = TurnId::new();
        acc.begin(next.clone());
        let state = acc.live().unwrap();
        assert_eq!(state.turn_id, next);
        assert!(state.text.is_empty());
    }
}
