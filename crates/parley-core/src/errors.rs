/// Errors returned to callers of `submit` and mirrored in the observable
/// error field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("a response is already streaming")]
    Busy,
    #[error("not connected to the chat service")]
    NotConnected,
    #[error("query is empty")]
    EmptyQuery,
    #[error("server error: {0}")]
    ServerReported(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("client is shut down")]
    Shutdown,
}

impl ClientError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::NotConnected => "not_connected",
            Self::EmptyQuery => "empty_query",
            Self::ServerReported(_) => "server_reported",
            Self::Encode(_) => "encode",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the same submit could succeed later without user changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::NotConnected)
    }
}

/// A frame that could not be turned into an inbound event. Never fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("invalid content for {kind}: {reason}")]
    InvalidContent { kind: &'static str, reason: String },
}

impl DecodeError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidContent { .. } => "invalid_content",
        }
    }
}

/// Connection-level failures. Recovered by reconnecting, never surfaced to
/// the consumer beyond the connection state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

impl TransportError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Send(_) => "send",
            Self::Receive(_) => "receive",
        }
    }
}
