//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens one duplex text-frame connection and hands it back as
//! a split sink/stream pair. [`WsConnector`] is the production WebSocket
//! implementation; tests use the in-memory connector from [`crate::mock`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use parley_core::TransportError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open connection, split into its two directions. The stream ends when
/// the peer closes.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

/// WebSocket connector over `tokio-tungstenite`. Only text frames are surfaced.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url, status = %response.status(), "websocket handshake complete");

        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer sent close frame");
                    None
                }
                Ok(other) => {
                    trace!(kind = ?other, "ignoring non-text frame");
                    None
                }
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}
