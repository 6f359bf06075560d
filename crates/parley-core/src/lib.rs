pub mod errors;
pub mod events;
pub mod ids;
pub mod turn;
pub mod wire;

pub use errors::{ClientError, DecodeError, TransportError};
pub use events::InboundEvent;
pub use ids::{ConnectionId, SessionId, TurnId};
pub use turn::{AudioClip, ChatTurn, Role, Transcript, TurnStatus};
pub use wire::{ChatRequest, CitationStyle, RawFrame, RequestSettings, Source};
