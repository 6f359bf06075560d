//! Connection manager: keeps one logical connection to the chat endpoint
//! alive, reconnecting with exponential backoff after unexpected closes.
//!
//! The manager owns a background task. Lifecycle changes and raw inbound
//! frames are reported as [`ConnectionSignal`]s on an mpsc channel; the current
//! [`ConnectionState`] is published on a watch channel. Outbound frames go
//! through a per-connection queue that is dropped together with the socket,
//! so a send can never leak onto a later connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parley_core::{ClientError, ConnectionId, TransportError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::transport::{Connector, Transport};

const OUTBOUND_QUEUE: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    /// Reconnect budget spent. Only [`ConnectionHandle::reconnect`] leaves
    /// this state.
    Disconnected,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Everything the manager reports to its owner, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionSignal {
    Opened {
        connection_id: ConnectionId,
    },
    Frame {
        connection_id: ConnectionId,
        text: String,
    },
    Closed {
        connection_id: ConnectionId,
        manual: bool,
    },
    TransportError {
        error: TransportError,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Disconnected {
        attempts: u32,
    },
}

/// Anything that can put a text frame on the current connection.
pub trait FrameSender: Send + Sync {
    fn send_frame(&self, text: String) -> Result<(), ClientError>;
}

struct LiveConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

struct Shared {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    signals: mpsc::Sender<ConnectionSignal>,
    state: watch::Sender<ConnectionState>,
    live: Mutex<Option<LiveConnection>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a running connection manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Start managing a connection to `url`. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        signals: mpsc::Sender<ConnectionSignal>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            url: url.into(),
            connector,
            policy,
            signals,
            state,
            live: Mutex::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });
        let handle = Self { shared };
        handle.start();
        handle
    }

    fn start(&self) {
        let task = tokio::spawn(run(Arc::clone(&self.shared)));
        if let Some(previous) = self.shared.task.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.live.lock().as_ref().map(|c| c.id.clone())
    }

    /// Queue a text frame on the open connection.
    pub fn send(&self, text: String) -> Result<(), ClientError> {
        let live = self.shared.live.lock();
        let Some(conn) = live.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        match conn.outbound.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    connection_id = %conn.id,
                    msg_len = msg.len(),
                    "outbound queue full, dropping frame"
                );
                Err(ClientError::NotConnected)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::NotConnected),
        }
    }

    /// Start a fresh reconnect cycle after the budget was spent. Returns
    /// `false` when the manager is not in [`ConnectionState::Disconnected`]
    /// or has been closed.
    pub fn reconnect(&self) -> bool {
        if self.shared.cancel.is_cancelled() || self.state() != ConnectionState::Disconnected {
            return false;
        }
        info!(url = %self.shared.url, "manual reconnect requested");
        self.start();
        true
    }

    /// Tear the connection down for good. No reconnect follows.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    /// Close and wait for the background task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl FrameSender for ConnectionHandle {
    fn send_frame(&self, text: String) -> Result<(), ClientError> {
        self.send(text)
    }
}

async fn run(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(url = %shared.url, attempt, "connecting");

        let outcome = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            outcome = shared.connector.connect(&shared.url) => outcome,
        };

        match outcome {
            Ok(transport) => {
                attempt = 0;
                if shared.pump(transport).await {
                    break;
                }
            }
            Err(error) => {
                warn!(url = %shared.url, attempt, error = %error, "connect failed");
                shared.emit(ConnectionSignal::TransportError { error }).await;
            }
        }

        shared.set_state(ConnectionState::Closed);

        let Some(delay) = shared.policy.delay_for(attempt) else {
            warn!(url = %shared.url, attempts = attempt, "reconnect budget spent, giving up");
            shared.set_state(ConnectionState::Disconnected);
            shared
                .emit(ConnectionSignal::Disconnected { attempts: attempt })
                .await;
            return;
        };

        attempt += 1;
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        shared
            .emit(ConnectionSignal::Reconnecting { attempt, delay })
            .await;

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.live.lock().take();
    shared.set_state(ConnectionState::Closed);
    debug!(url = %shared.url, "connection manager stopped");
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn emit(&self, signal: ConnectionSignal) {
        if self.signals.send(signal).await.is_err() {
            debug!("signal receiver dropped");
        }
    }

    /// Drive one open connection until it closes. Returns `true` when the
    /// close was requested through the handle.
    async fn pump(&self, transport: Transport) -> bool {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        let connection_id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

        *self.live.lock() = Some(LiveConnection {
            id: connection_id.clone(),
            outbound: tx,
        });
        self.set_state(ConnectionState::Open);
        info!(connection_id = %connection_id, url = %self.url, "connected");
        self.emit(ConnectionSignal::Opened {
            connection_id: connection_id.clone(),
        })
        .await;

        let manual = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break true,
                outbound = rx.recv() => {
                    let Some(text) = outbound else { break false };
                    if let Err(error) = sink.send(text).await {
                        warn!(connection_id = %connection_id, error = %error, "send failed");
                        self.emit(ConnectionSignal::TransportError { error }).await;
                        break false;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        self.emit(ConnectionSignal::Frame {
                            connection_id: connection_id.clone(),
                            text,
                        })
                        .await;
                    }
                    Some(Err(error)) => {
                        warn!(connection_id = %connection_id, error = %error, "receive failed");
                        self.emit(ConnectionSignal::TransportError { error }).await;
                        break false;
                    }
                    None => break false,
                },
            }
        };

        self.live.lock().take();
        if manual {
            self.set_state(ConnectionState::Closing);
            if let Err(error) = sink.close().await {
                debug!(connection_id = %connection_id, error = %error, "close handshake failed");
            }
        }
        info!(connection_id = %connection_id, manual, "connection closed");
        self.emit(ConnectionSignal::Closed {
            connection_id,
            manual,
        })
        .await;
        manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryConnector;

    async fn next_signal(rx: &mut mpsc::Receiver<ConnectionSignal>) -> ConnectionSignal {
        rx.recv().await.expect("signal channel open")
    }

    fn spawn_manager(
        connector: &Arc<MemoryConnector>,
        policy: ReconnectPolicy,
    ) -> (ConnectionHandle, mpsc::Receiver<ConnectionSignal>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = ConnectionHandle::spawn(
            "ws://test/ws/chat",
            Arc::clone(connector) as Arc<dyn Connector>,
            policy,
            tx,
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn opens_and_forwards_frames_both_ways() {
        let (connector, mut peers) = MemoryConnector::new();
        let (handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        let mut peer = peers.recv().await.unwrap();
        let opened = next_signal(&mut signals).await;
        assert!(matches!(opened, ConnectionSignal::Opened { .. }));
        assert_eq!(handle.state(), ConnectionState::Open);
        assert!(handle.connection_id().is_some());

        handle.send("hello".into()).unwrap();
        assert_eq!(peer.recv_frame().await.as_deref(), Some("hello"));

        peer.send_frame(r#"{"type":"chunk","content":"hi"}"#);
        match next_signal(&mut signals).await {
            ConnectionSignal::Frame { text, .. } => assert!(text.contains("chunk")),
            other => panic!("expected frame, got {other:?}"),
        }

        handle.shutdown().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_without_connection_is_not_connected() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse_all();
        let (handle, _signals) = spawn_manager(&connector, ReconnectPolicy::default());
        assert_eq!(handle.send("x".into()), Err(ClientError::NotConnected));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_then_gives_up() {
        let (connector, mut peers) = MemoryConnector::new();
        let (handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        let mut peer = peers.recv().await.unwrap();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Opened { .. }));

        connector.refuse_all();
        peer.close();

        assert!(matches!(
            next_signal(&mut signals).await,
            ConnectionSignal::Closed { manual: false, .. }
        ));

        let mut delays = Vec::new();
        loop {
            match next_signal(&mut signals).await {
                ConnectionSignal::Reconnecting { delay, .. } => delays.push(delay.as_millis()),
                ConnectionSignal::TransportError { .. } => {}
                ConnectionSignal::Disconnected { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                other => panic!("unexpected signal {other:?}"),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
        assert_eq!(connector.attempts(), 6);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_the_attempt_counter() {
        let (connector, mut peers) = MemoryConnector::new();
        let (_handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        let mut first = peers.recv().await.unwrap();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Opened { .. }));
        first.close();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Closed { .. }));
        assert_eq!(
            next_signal(&mut signals).await,
            ConnectionSignal::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );

        let mut second = peers.recv().await.unwrap();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Opened { .. }));
        second.close();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Closed { .. }));
        assert_eq!(
            next_signal(&mut signals).await,
            ConnectionSignal::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_reconnect() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse_all();
        let (handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        loop {
            if let ConnectionSignal::Reconnecting { attempt, .. } = next_signal(&mut signals).await {
                assert_eq!(attempt, 1);
                break;
            }
        }
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(!handle.reconnect());
        while let Ok(signal) = signals.try_recv() {
            assert!(
                !matches!(signal, ConnectionSignal::Opened { .. } | ConnectionSignal::Reconnecting { .. }),
                "unexpected signal after shutdown: {signal:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receive_error_triggers_a_reconnect() {
        let (connector, mut peers) = MemoryConnector::new();
        let (handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        let first = peers.recv().await.unwrap();
        let first_id = match next_signal(&mut signals).await {
            ConnectionSignal::Opened { connection_id } => connection_id,
            other => panic!("expected open, got {other:?}"),
        };

        first.send_error(TransportError::Receive("connection reset".into()));
        assert_eq!(
            next_signal(&mut signals).await,
            ConnectionSignal::TransportError {
                error: TransportError::Receive("connection reset".into())
            }
        );
        assert_eq!(
            next_signal(&mut signals).await,
            ConnectionSignal::Closed {
                connection_id: first_id.clone(),
                manual: false
            }
        );
        assert!(matches!(
            next_signal(&mut signals).await,
            ConnectionSignal::Reconnecting { attempt: 1, .. }
        ));

        let _second = peers.recv().await.unwrap();
        match next_signal(&mut signals).await {
            ConnectionSignal::Opened { connection_id } => assert_ne!(connection_id, first_id),
            other => panic!("expected open, got {other:?}"),
        }
        assert_eq!(connector.attempts(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_close_does_not_reconnect() {
        let (connector, mut peers) = MemoryConnector::new();
        let (handle, mut signals) = spawn_manager(&connector, ReconnectPolicy::default());

        let _peer = peers.recv().await.unwrap();
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Opened { .. }));

        handle.shutdown().await;
        assert!(matches!(
            next_signal(&mut signals).await,
            ConnectionSignal::Closed { manual: true, .. }
        ));
        assert_eq!(connector.attempts(), 1);
        assert!(!handle.reconnect());
        assert_eq!(handle.send("late".into()), Err(ClientError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rearms_after_disconnect() {
        let (connector, mut peers) = MemoryConnector::new();
        connector.refuse_all();
        let policy = ReconnectPolicy {
            max_attempts: 1,
            ..Default::default()
        };
        let (handle, mut signals) = spawn_manager(&connector, policy);

        loop {
            if let ConnectionSignal::Disconnected { .. } = next_signal(&mut signals).await {
                break;
            }
        }
        connector.accept_all();
        assert!(handle.reconnect());
        let _peer = peers.recv().await.unwrap();
        loop {
            if let ConnectionSignal::Opened { .. } = next_signal(&mut signals).await {
                break;
            }
        }
        assert!(handle.state().is_open());
        handle.shutdown().await;
    }
}
