//! In-memory doubles for driving the client without a network.
//!
//! [`MemoryConnector`] hands every accepted connection's far end to the test
//! as a [`MemoryPeer`]. [`RecordingSynthesizer`] returns scripted speech
//! results and records what it was asked to say.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use parking_lot::Mutex;
use parley_core::{AudioClip, ClientError, SessionId, TransportError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use crate::connection::FrameSender;
use crate::speech::{SpeechError, SpeechSynthesizer};
use crate::transport::{Connector, Transport};

const PEER_QUEUE: usize = 1024;

/// Connector whose connections terminate in the test.
pub struct MemoryConnector {
    accepting: AtomicBool,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepting: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            peers,
        });
        (connector, rx)
    }

    pub fn refuse_all(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn accept_all(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Connect calls seen so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!("connection refused: {url}")));
        }

        let (to_client, client_inbound) = mpsc::channel(PEER_QUEUE);
        let (client_outbound, from_client) = mpsc::channel(PEER_QUEUE);

        let peer = MemoryPeer {
            inbound: Some(to_client),
            outbound: from_client,
        };
        if self.peers.send(peer).is_err() {
            return Err(TransportError::Connect("no peer listener".into()));
        }

        let sink = PollSender::new(client_outbound)
            .sink_map_err(|_| TransportError::Send("peer hung up".into()));
        let stream = ReceiverStream::new(client_inbound);
        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Far end of one in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<Result<String, TransportError>>>,
    outbound: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Deliver a text frame to the client.
    pub fn send_frame(&self, text: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.try_send(Ok(text.into()));
        }
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_frame(value.to_string());
    }

    /// Fail the client's read side.
    pub fn send_error(&self, error: TransportError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.try_send(Err(error));
        }
    }

    /// Next frame the client sent, or `None` once it hung up.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Close from the server side.
    pub fn close(&mut self) {
        self.inbound.take();
    }
}

/// [`FrameSender`] that records frames instead of sending them.
#[derive(Default)]
pub struct RecordingSender {
    frames: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl FrameSender for RecordingSender {
    fn send_frame(&self, text: String) -> Result<(), ClientError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.frames.lock().push(text);
        Ok(())
    }
}

/// Scripted speech outcome.
pub enum MockSpeech {
    Audio(Vec<u8>),
    Error(SpeechError),
    /// Wait, then yield the inner outcome.
    Delay(Duration, Box<MockSpeech>),
}

/// Synthesizer that replays scripted results in order and records requests.
/// Once the script runs out every request yields a one-byte clip.
pub struct RecordingSynthesizer {
    script: Mutex<VecDeque<MockSpeech>>,
    requests: Mutex<Vec<String>>,
    has_voice: AtomicBool,
}

impl RecordingSynthesizer {
    pub fn new(script: Vec<MockSpeech>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            has_voice: AtomicBool::new(false),
        }
    }

    pub fn with_voice_sample(self) -> Self {
        self.has_voice.store(true, Ordering::SeqCst);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for RecordingSynthesizer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, _session_id: &SessionId) -> Result<AudioClip, SpeechError> {
        self.requests.lock().push(text.to_string());
        let mut next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(MockSpeech::Audio(vec![0]));
        loop {
            match next {
                MockSpeech::Audio(data) => return Ok(AudioClip { data }),
                MockSpeech::Error(error) => return Err(error),
                MockSpeech::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    next = *inner;
                }
            }
        }
    }

    async fn has_voice_sample(&self, _session_id: &SessionId) -> bool {
        self.has_voice.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn memory_connection_carries_frames_both_ways() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut transport = connector.connect("ws://memory").await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        transport.sink.send("up".to_string()).await.unwrap();
        assert_eq!(peer.recv_frame().await.as_deref(), Some("up"));

        peer.send_frame("down");
        assert_eq!(transport.stream.next().await, Some(Ok("down".to_string())));

        peer.close();
        assert_eq!(transport.stream.next().await, None);
    }

    #[tokio::test]
    async fn refused_connections_are_counted() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse_all();
        assert!(matches!(
            connector.connect("ws://memory").await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn synthesizer_replays_script_then_defaults() {
        let synth = RecordingSynthesizer::new(vec![MockSpeech::Error(SpeechError::MissingAudio)]);
        let session = SessionId::new();
        assert_eq!(
            synth.synthesize("one", &session).await,
            Err(SpeechError::MissingAudio)
        );
        assert_eq!(
            synth.synthesize("two", &session).await,
            Ok(AudioClip { data: vec![0] })
        );
        assert_eq!(synth.requests(), vec!["one".to_string(), "two".to_string()]);
        assert!(!synth.has_voice_sample(&session).await);
    }
}
