//! Consumer-facing chat client.
//!
//! [`ChatClient`] spawns a connection manager and a runtime task that owns the
//! [`SessionCoordinator`]. The runtime drains one select loop over consumer
//! commands, connection signals, state changes, the coalescer deadline and
//! speech-service results. Synthesis and the once-per-session voice sample
//! check run in detached tasks; their results come back through the loop like
//! everything else.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parley_core::{AudioClip, ClientError, RequestSettings, SessionId, TurnId};
use parley_settings::ParleySettings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::backoff::ReconnectPolicy;
use crate::coalescer::DEFAULT_FLUSH_INTERVAL;
use crate::connection::{ConnectionHandle, ConnectionSignal, ConnectionState, FrameSender};
use crate::coordinator::{SessionCoordinator, SideEffect};
use crate::snapshot::ChatSnapshot;
use crate::speech::{SpeechError, SpeechSynthesizer};
use crate::transport::{Connector, WsConnector};

const COMMAND_QUEUE: usize = 32;
const SIGNAL_QUEUE: usize = 256;
const SPEECH_QUEUE: usize = 8;

#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    pub chat_url: String,
    pub reconnect: ReconnectPolicy,
    pub flush_interval: Duration,
    pub speech_enabled: bool,
    pub request: RequestSettings,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            chat_url: "ws://localhost:8000/ws/chat".to_string(),
            reconnect: ReconnectPolicy::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            speech_enabled: false,
            request: RequestSettings::default(),
        }
    }
}

impl From<&ParleySettings> for ChatClientConfig {
    fn from(settings: &ParleySettings) -> Self {
        Self {
            chat_url: settings.chat_url(),
            reconnect: ReconnectPolicy::from(&settings.reconnect),
            flush_interval: settings.streaming.flush_interval(),
            speech_enabled: settings.speech.enabled,
            request: settings.request.clone(),
        }
    }
}

enum Command {
    Submit {
        query: String,
        settings: RequestSettings,
        reply: oneshot::Sender<Result<TurnId, ClientError>>,
    },
    SetSpeech(bool),
    Shutdown,
}

/// Handle to a running chat session.
pub struct ChatClient {
    session_id: SessionId,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ChatSnapshot>,
    connection: ConnectionHandle,
    defaults: RequestSettings,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Connect to the chat endpoint described by `settings`, with speech
    /// served by the REST API when enabled.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(ApiClient::from_settings(settings));
        Self::start(
            ChatClientConfig::from(settings),
            Arc::new(WsConnector),
            Some(synthesizer),
        )
    }

    /// Start a session over any connector. Must be called inside a tokio
    /// runtime.
    pub fn start(
        config: ChatClientConfig,
        connector: Arc<dyn Connector>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        let session_id = SessionId::new();
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
        let connection = ConnectionHandle::spawn(
            config.chat_url.clone(),
            connector,
            config.reconnect.clone(),
            signal_tx,
        );

        let speech_enabled = config.speech_enabled && synthesizer.is_some();
        if config.speech_enabled && synthesizer.is_none() {
            warn!("speech requested but no synthesizer configured");
        }
        let sender: Arc<dyn FrameSender> = Arc::new(connection.clone());
        let coordinator =
            SessionCoordinator::new(session_id.clone(), sender, config.flush_interval, speech_enabled);
        let snapshots = coordinator.subscribe();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (speech_tx, speech_rx) = mpsc::channel(SPEECH_QUEUE);
        let (voice_tx, voice_rx) = mpsc::channel(1);
        let runtime = Runtime {
            coordinator,
            commands: command_rx,
            signals: signal_rx,
            state: connection.subscribe_state(),
            connection: connection.clone(),
            synthesizer,
            speech_tx,
            speech_rx,
            voice_tx,
            voice_rx,
            voice_checked: false,
        };
        info!(session_id = %session_id, url = %config.chat_url, "chat session started");
        let task = tokio::spawn(runtime.run());

        Self {
            session_id,
            commands: command_tx,
            snapshots,
            connection,
            defaults: config.request,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Submit with the configured request settings.
    pub async fn submit(&self, query: impl Into<String>) -> Result<TurnId, ClientError> {
        self.submit_with(query, self.defaults.clone()).await
    }

    pub async fn submit_with(
        &self,
        query: impl Into<String>,
        settings: RequestSettings,
    ) -> Result<TurnId, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                query: query.into(),
                settings,
                reply,
            })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    pub async fn set_speech_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.commands
            .send(Command::SetSpeech(enabled))
            .await
            .map_err(|_| ClientError::Shutdown)
    }

    /// Retry after the reconnect budget was spent.
    pub fn reconnect(&self) -> bool {
        self.connection.reconnect()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ChatSnapshot) -> bool,
    ) -> Result<ChatSnapshot, ClientError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(snapshot.clone())
    }

    pub async fn wait_connected(&self) -> Result<ChatSnapshot, ClientError> {
        self.wait_for(|s| s.is_connected).await
    }

    /// Stop the session: close the connection, cancel pending reconnects and
    /// wait for the runtime to exit. In-flight synthesis is left to finish on
    /// its own.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.connection.shutdown().await;
    }
}

struct Runtime {
    coordinator: SessionCoordinator,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::Receiver<ConnectionSignal>,
    state: watch::Receiver<ConnectionState>,
    connection: ConnectionHandle,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    speech_tx: mpsc::Sender<(TurnId, Result<AudioClip, SpeechError>)>,
    speech_rx: mpsc::Receiver<(TurnId, Result<AudioClip, SpeechError>)>,
    voice_tx: mpsc::Sender<bool>,
    voice_rx: mpsc::Receiver<bool>,
    voice_checked: bool,
}

impl Runtime {
    async fn run(mut self) {
        loop {
            let deadline = self.coordinator.flush_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit { query, settings, reply }) => {
                        let result = self.coordinator.submit(&query, settings);
                        let _ = reply.send(result);
                    }
                    Some(Command::SetSpeech(enabled)) => {
                        if enabled && self.synthesizer.is_none() {
                            warn!("cannot enable speech without a synthesizer");
                        } else {
                            self.coordinator.set_speech_enabled(enabled);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                signal = self.signals.recv() => match signal {
                    Some(signal) => {
                        let opened = matches!(signal, ConnectionSignal::Opened { .. });
                        if let Some(effect) = self.coordinator.handle_signal(signal, Instant::now()) {
                            self.run_effect(effect);
                        }
                        if opened {
                            self.check_voice_sample();
                        }
                    }
                    None => break,
                },
                Ok(()) = self.state.changed() => {
                    let state = *self.state.borrow_and_update();
                    self.coordinator.set_connection_state(state);
                }
                Some((turn_id, result)) = self.speech_rx.recv() => {
                    self.coordinator.apply_speech_result(turn_id, result);
                }
                Some(has_voice) = self.voice_rx.recv() => {
                    self.coordinator.set_voice_sample(has_voice);
                }
                _ = flush_tick(deadline) => {
                    self.coordinator.flush_due(Instant::now());
                }
            }
        }

        // Nobody drains signals any more; let the connection task's sends fail.
        drop(self.signals);
        self.connection.shutdown().await;
        debug!(session_id = %self.coordinator.session_id(), "chat runtime stopped");
    }

    /// Ask the speech service once per session, after the first open.
    fn check_voice_sample(&mut self) {
        if self.voice_checked {
            return;
        }
        let Some(synthesizer) = self.synthesizer.as_ref().map(Arc::clone) else {
            return;
        };
        self.voice_checked = true;
        let session_id = self.coordinator.session_id().clone();
        let results = self.voice_tx.clone();
        tokio::spawn(async move {
            let has_voice = synthesizer.has_voice_sample(&session_id).await;
            let _ = results.send(has_voice).await;
        });
    }

    fn run_effect(&self, effect: SideEffect) {
        match effect {
            SideEffect::Synthesize { turn_id, text } => {
                let Some(synthesizer) = self.synthesizer.as_ref().map(Arc::clone) else {
                    return;
                };
                let session_id = self.coordinator.session_id().clone();
                let results = self.speech_tx.clone();
                tokio::spawn(async move {
                    let result = synthesizer.synthesize(&text, &session_id).await;
                    let _ = results.send((turn_id, result)).await;
                });
            }
        }
    }
}

async fn flush_tick(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
