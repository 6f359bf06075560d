use parley_core::{DecodeError, InboundEvent, RawFrame, Source};
use serde_json::Value;
use tracing::warn;

/// Turns raw inbound text frames into [`InboundEvent`]s.
///
/// Bad frames never abort the stream: they are logged, counted and skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame, or `None` if it was dropped.
    pub fn decode(&mut self, text: &str) -> Option<InboundEvent> {
        match decode_frame(text) {
            Ok(event) => Some(event),
            Err(error) => {
                self.dropped += 1;
                warn!(
                    error_kind = error.error_kind(),
                    error = %error,
                    frame_len = text.len(),
                    "dropping inbound frame"
                );
                None
            }
        }
    }

    /// Frames skipped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Strict single-frame decode.
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match frame.kind.as_str() {
        "chunk" => string_content("chunk", frame.content).map(InboundEvent::TextChunk),
        "sources" => serde_json::from_value::<Vec<Source>>(frame.content)
            .map(InboundEvent::SourceSet)
            .map_err(|e| invalid("sources", e.to_string())),
        "enhanced_query" => {
            string_content("enhanced_query", frame.content).map(InboundEvent::EnhancedQuery)
        }
        "suggested_questions" => serde_json::from_value::<Vec<String>>(frame.content)
            .map(InboundEvent::SuggestedQuestions)
            .map_err(|e| invalid("suggested_questions", e.to_string())),
        "done" => Ok(InboundEvent::Completed),
        "error" => string_content("error", frame.content).map(InboundEvent::Failure),
        _ => Err(DecodeError::UnknownType(frame.kind)),
    }
}

fn string_content(kind: &'static str, content: Value) -> Result<String, DecodeError> {
    match content {
        Value::String(s) => Ok(s),
        other => Err(invalid(kind, format!("expected string, got {}", type_name(&other)))),
    }
}

fn invalid(kind: &'static str, reason: String) -> DecodeError {
    DecodeError::InvalidContent { kind, reason }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
