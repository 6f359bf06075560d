//! # parley-client
//!
//! Client-side streaming chat core: keeps a WebSocket to the inference
//! service alive, turns streamed frames into a coherent answer, publishes
//! rate-limited snapshots to the consumer and triggers speech synthesis once
//! an answer is complete.

#![deny(unsafe_code)]

pub mod accumulator;
pub mod api;
pub mod backoff;
pub mod client;
pub mod coalescer;
pub mod connection;
pub mod coordinator;
pub mod decoder;
pub mod snapshot;
pub mod speech;
pub mod transport;

pub mod mock;

pub use api::{ApiClient, ApiError, HealthStatus, SettingRange, SettingsResponse};
pub use backoff::ReconnectPolicy;
pub use client::{ChatClient, ChatClientConfig};
pub use connection::{ConnectionHandle, ConnectionSignal, ConnectionState};
pub use coordinator::{SessionCoordinator, SideEffect};
pub use snapshot::ChatSnapshot;
pub use speech::{SpeechError, SpeechSynthesizer};
pub use transport::{Connector, Transport, WsConnector};
