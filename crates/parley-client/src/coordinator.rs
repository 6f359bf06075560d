//! Session coordinator: owns one chat session's state and enforces the
//! one-turn-in-flight rule.
//!
//! Everything here is synchronous. The runtime in [`crate::client`] feeds it
//! consumer commands, connection signals, flush ticks and synthesis results
//! one at a time, and runs the [`SideEffect`]s it hands back. Every published
//! [`ChatSnapshot`] goes out through a watch channel the coordinator owns.

use std::sync::Arc;
use std::time::Duration;

use parley_core::{
    AudioClip, ChatRequest, ClientError, ConnectionId, InboundEvent, RequestSettings, SessionId,
    Source, Transcript, TurnId, TurnStatus,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::{AccumulatorOutcome, StreamAccumulator, TurnState};
use crate::coalescer::UpdateCoalescer;
use crate::connection::{ConnectionSignal, ConnectionState, FrameSender};
use crate::decoder::FrameDecoder;
use crate::snapshot::ChatSnapshot;
use crate::speech::SpeechError;

/// Work the coordinator wants done outside its own loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SideEffect {
    Synthesize { turn_id: TurnId, text: String },
}

/// Latest streamed values shown to the consumer. Survives completion so the
/// finished answer stays on screen until the next submit.
#[derive(Debug, Default)]
struct LiveView {
    text: String,
    sources: Vec<Source>,
    enhanced_query: Option<String>,
    suggested_questions: Vec<String>,
}

pub struct SessionCoordinator {
    session_id: SessionId,
    sender: Arc<dyn FrameSender>,
    decoder: FrameDecoder,
    accumulator: StreamAccumulator,
    coalescer: UpdateCoalescer,
    transcript: Transcript,
    view: LiveView,
    connection_state: ConnectionState,
    /// Connection the session last saw open. Closes for any other id are stale.
    connection: Option<ConnectionId>,
    in_flight: Option<TurnId>,
    latest_turn: Option<TurnId>,
    synthesizing: Option<TurnId>,
    speech_enabled: bool,
    has_voice_sample: bool,
    error: Option<ClientError>,
    synthesis_requests: u64,
    revision: u64,
    published: watch::Sender<ChatSnapshot>,
}

impl SessionCoordinator {
    pub fn new(
        session_id: SessionId,
        sender: Arc<dyn FrameSender>,
        flush_interval: Duration,
        speech_enabled: bool,
    ) -> Self {
        let mut initial = ChatSnapshot::new(session_id.clone());
        initial.speech_enabled = speech_enabled;
        let (published, _) = watch::channel(initial);
        Self {
            session_id,
            sender,
            decoder: FrameDecoder::new(),
            accumulator: StreamAccumulator::new(),
            coalescer: UpdateCoalescer::new(flush_interval),
            transcript: Transcript::new(),
            view: LiveView::default(),
            connection_state: ConnectionState::Connecting,
            connection: None,
            in_flight: None,
            latest_turn: None,
            synthesizing: None,
            speech_enabled,
            has_voice_sample: false,
            error: None,
            synthesis_requests: 0,
            revision: 0,
            published,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.published.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.published.borrow().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn live_state(&self) -> Option<&TurnState> {
        self.accumulator.live()
    }

    pub fn flushes(&self) -> u64 {
        self.coalescer.flushes()
    }

    pub fn synthesis_requests(&self) -> u64 {
        self.synthesis_requests
    }

    pub fn dropped_frames(&self) -> u64 {
        self.decoder.dropped()
    }

    /// When the pending coalesced flush is due, if any.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    /// Send a query. Rejections are returned and mirrored in the published
    /// `error` field; they never touch the turn in flight.
    pub fn submit(&mut self, query: &str, settings: RequestSettings) -> Result<TurnId, ClientError> {
        match self.try_submit(query, settings) {
            Ok(turn_id) => Ok(turn_id),
            Err(error) => {
                debug!(error_kind = error.error_kind(), "submit rejected");
                self.error = Some(error.clone());
                self.publish();
                Err(error)
            }
        }
    }

    fn try_submit(&mut self, query: &str, settings: RequestSettings) -> Result<TurnId, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::EmptyQuery);
        }
        if self.in_flight.is_some() {
            return Err(ClientError::Busy);
        }
        if !self.connection_state.is_open() {
            return Err(ClientError::NotConnected);
        }

        let payload = ChatRequest::new(query, settings)
            .to_json()
            .map_err(|e| ClientError::Encode(e.to_string()))?;
        self.sender.send_frame(payload)?;

        let turn_id = TurnId::new();
        info!(turn_id = %turn_id, query_len = query.len(), "query submitted");

        self.accumulator.begin(turn_id.clone());
        self.coalescer.cancel();
        self.transcript.push_user(turn_id.clone(), query);
        self.transcript.assistant_mut(&turn_id);
        self.view.text.clear();
        self.view.sources.clear();
        self.view.suggested_questions.clear();
        self.error = None;
        self.synthesizing = None;
        self.in_flight = Some(turn_id.clone());
        self.latest_turn = Some(turn_id.clone());
        self.publish();
        Ok(turn_id)
    }

    pub fn set_speech_enabled(&mut self, enabled: bool) {
        if self.speech_enabled != enabled {
            info!(enabled, "speech toggled");
            self.speech_enabled = enabled;
            self.publish();
        }
    }

    /// Record whether the speech service holds a voice sample for this session.
    pub fn set_voice_sample(&mut self, has_voice: bool) {
        if self.has_voice_sample != has_voice {
            debug!(has_voice, "voice sample status");
            self.has_voice_sample = has_voice;
            self.publish();
        }
    }

    /// Mirror the connection manager's state.
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state != state {
            self.connection_state = state;
            self.publish();
        }
    }

    pub fn handle_signal(&mut self, signal: ConnectionSignal, now: Instant) -> Option<SideEffect> {
        match signal {
            ConnectionSignal::Frame { text, .. } => {
                let event = self.decoder.decode(&text)?;
                self.handle_event(event, now)
            }
            ConnectionSignal::Opened { connection_id } => {
                debug!(connection_id = %connection_id, "session connected");
                self.connection = Some(connection_id);
                self.set_connection_state(ConnectionState::Open);
                None
            }
            ConnectionSignal::Closed { connection_id, manual } => {
                if self.connection.as_ref() != Some(&connection_id) {
                    debug!(connection_id = %connection_id, "ignoring close of a stale connection");
                    return None;
                }
                debug!(connection_id = %connection_id, manual, "session connection closed");
                self.connection = None;
                self.interrupt();
                self.connection_state = ConnectionState::Closed;
                self.publish();
                None
            }
            ConnectionSignal::TransportError { error } => {
                debug!(error_kind = error.error_kind(), error = %error, "transport error");
                None
            }
            ConnectionSignal::Reconnecting { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting to reconnect");
                None
            }
            ConnectionSignal::Disconnected { attempts } => {
                warn!(attempts, "connection lost for good");
                self.set_connection_state(ConnectionState::Disconnected);
                None
            }
        }
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: Instant) -> Option<SideEffect> {
        if let InboundEvent::Failure(message) = &event {
            if !self.accumulator.is_live() {
                warn!(error = %message, "service reported an error outside a turn");
                self.error = Some(ClientError::ServerReported(message.clone()));
                self.publish();
                return None;
            }
        }
        match self.accumulator.apply(event) {
            AccumulatorOutcome::Ignored => None,
            AccumulatorOutcome::Updated => {
                self.coalescer.observe(now);
                None
            }
            AccumulatorOutcome::Completed(state) => self.complete(state),
            AccumulatorOutcome::Failed { partial, message } => {
                self.fail(partial, message);
                None
            }
        }
    }

    /// Publish the live state if the coalesced tick has arrived.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        if !self.coalescer.take_due(now) {
            return false;
        }
        if let Some(state) = self.accumulator.live().cloned() {
            self.write_live(&state);
        }
        self.publish();
        true
    }

    /// Attach a synthesis result. Audio only lands on the latest turn;
    /// results for older turns are dropped.
    pub fn apply_speech_result(&mut self, turn_id: TurnId, result: Result<AudioClip, SpeechError>) {
        if self.synthesizing.as_ref() == Some(&turn_id) {
            self.synthesizing = None;
        }
        match result {
            Ok(clip) if self.latest_turn.as_ref() == Some(&turn_id) => {
                debug!(turn_id = %turn_id, bytes = clip.len(), "speech attached");
                if let Some(turn) = self.transcript.find_assistant_mut(&turn_id) {
                    turn.audio = Some(clip);
                }
            }
            Ok(_) => debug!(turn_id = %turn_id, "discarding speech for superseded turn"),
            Err(error) => warn!(
                turn_id = %turn_id,
                error_kind = error.error_kind(),
                error = %error,
                "speech synthesis failed"
            ),
        }
        self.publish();
    }

    fn complete(&mut self, state: TurnState) -> Option<SideEffect> {
        // Final flush goes out before the streaming flag flips.
        self.coalescer.force_flush();
        self.write_live(&state);
        self.publish();

        let turn_id = state.turn_id;
        let enhanced = state.enhanced_query.or_else(|| {
            self.transcript
                .last_enhanced_query(&turn_id)
                .map(str::to_owned)
        });
        if let Some(query) = &enhanced {
            self.view.enhanced_query = Some(query.clone());
        }

        let turn = self.transcript.assistant_mut(&turn_id);
        turn.content = state.text.clone();
        turn.sources = state.sources;
        turn.suggested_questions = state.suggested_questions;
        turn.enhanced_query = enhanced;
        turn.status = TurnStatus::Complete;
        self.in_flight = None;
        info!(turn_id = %turn_id, text_len = state.text.len(), chunks = state.chunks, "turn complete");

        let effect = if self.speech_enabled && !state.text.trim().is_empty() {
            self.synthesizing = Some(turn_id.clone());
            self.synthesis_requests += 1;
            Some(SideEffect::Synthesize {
                turn_id,
                text: state.text,
            })
        } else {
            None
        };
        self.publish();
        effect
    }

    fn fail(&mut self, partial: TurnState, message: String) {
        warn!(turn_id = %partial.turn_id, error = %message, "service reported an error");
        self.coalescer.force_flush();
        self.write_live(&partial);
        let turn = self.transcript.assistant_mut(&partial.turn_id);
        turn.content = partial.text;
        turn.status = TurnStatus::Failed;
        self.error = Some(ClientError::ServerReported(message));
        self.in_flight = None;
        self.publish();
    }

    /// Abandon the turn in flight after its connection went away.
    fn interrupt(&mut self) {
        let Some(partial) = self.accumulator.abandon() else {
            return;
        };
        warn!(turn_id = %partial.turn_id, text_len = partial.text.len(), "turn interrupted by disconnect");
        self.coalescer.cancel();
        self.write_live(&partial);
        let turn = self.transcript.assistant_mut(&partial.turn_id);
        turn.content = partial.text;
        turn.status = TurnStatus::Interrupted;
        self.in_flight = None;
    }

    fn write_live(&mut self, state: &TurnState) {
        self.view.text.clone_from(&state.text);
        self.view.sources.clone_from(&state.sources);
        self.view.suggested_questions.clone_from(&state.suggested_questions);
        if let Some(query) = &state.enhanced_query {
            self.view.enhanced_query = Some(query.clone());
        }
        if let Some(turn) = self.transcript.find_assistant_mut(&state.turn_id) {
            if turn.is_streaming() {
                turn.content.clone_from(&state.text);
                turn.sources.clone_from(&state.sources);
            }
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = ChatSnapshot {
            session_id: self.session_id.clone(),
            revision: self.revision,
            connection_state: self.connection_state,
            is_connected: self.connection_state.is_open(),
            is_streaming: self.in_flight.is_some(),
            current_text: self.view.text.clone(),
            current_sources: self.view.sources.clone(),
            enhanced_query: self.view.enhanced_query.clone(),
            suggested_questions: self.view.suggested_questions.clone(),
            error: self.error.clone(),
            speech_enabled: self.speech_enabled,
            has_voice_sample: self.has_voice_sample,
            synthesizing: self.synthesizing.is_some(),
            turns: self.transcript.turns().to_vec(),
        };
        self.published.send_replace(snapshot);
    }
}
