//! Settings schema. Every section has compiled defaults so a partial (or
//! missing) settings file is always valid.

use std::time::Duration;

use parley_core::RequestSettings;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub endpoint: EndpointSettings,
    pub reconnect: ReconnectSettings,
    pub streaming: StreamingSettings,
    pub speech: SpeechSettings,
    pub logging: LoggingSettings,
    /// Request knobs sent with every query. Uses the wire field names.
    pub request: RequestSettings,
}

impl ParleySettings {
    /// Full chat endpoint, e.g. `ws://localhost:8000/ws/chat`.
    pub fn chat_url(&self) -> String {
        format!(
            "{}{}",
            self.endpoint.ws_url.trim_end_matches('/'),
            self.endpoint.chat_path
        )
    }

    /// Reject values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.chat_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "chat path must start with '/': {}",
                self.endpoint.chat_path
            )));
        }
        if !(self.endpoint.ws_url.starts_with("ws://") || self.endpoint.ws_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "websocket url must use ws:// or wss://: {}",
                self.endpoint.ws_url
            )));
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect delays out of order: base {}ms, max {}ms",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if self.streaming.flush_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "flush interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Where the inference service lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// WebSocket base URL.
    pub ws_url: String,
    /// Path of the streaming chat endpoint.
    pub chat_path: String,
    /// HTTP base URL for the speech, health and settings endpoints.
    pub api_url: String,
    /// Timeout for HTTP collaborator calls in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000".to_string(),
            chat_path: "/ws/chat".to_string(),
            api_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 60_000,
        }
    }
}

/// Reconnect backoff: `min(base * 2^attempt, max)`, at most `max_attempts`
/// consecutive failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    /// Minimum spacing between partial-answer updates (one display frame).
    pub flush_interval_ms: u64,
}

impl StreamingSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 16,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSettings {
    /// Synthesize speech for every completed answer.
    pub enabled: bool,
    pub language: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            language: "en".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_service() {
        let settings = ParleySettings::default();
        assert_eq!(settings.chat_url(), "ws://localhost:8000/ws/chat");
        assert_eq!(settings.endpoint.api_url, "http://localhost:8000");
        assert_eq!(settings.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.reconnect.max_delay_ms, 10_000);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.streaming.flush_interval(), Duration::from_millis(16));
        assert!(!settings.speech.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn chat_url_tolerates_trailing_slash() {
        let mut settings = ParleySettings::default();
        settings.endpoint.ws_url = "wss://chat.example.com/".into();
        assert_eq!(settings.chat_url(), "wss://chat.example.com/ws/chat");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["endpoint"]["wsUrl"], "ws://localhost:8000");
        assert_eq!(json["reconnect"]["maxAttempts"], 5);
        assert_eq!(json["streaming"]["flushIntervalMs"], 16);
        assert_eq!(json["request"]["initial_top_k"], 25);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = ParleySettings::default();
        settings.endpoint.chat_path = "ws/chat".into();
        assert!(settings.validate().is_err());

        let mut settings = ParleySettings::default();
        settings.endpoint.ws_url = "http://localhost:8000".into();
        assert!(settings.validate().is_err());

        let mut settings = ParleySettings::default();
        settings.reconnect.max_delay_ms = 10;
        assert!(settings.validate().is_err());

        let mut settings = ParleySettings::default();
        settings.streaming.flush_interval_ms = 0;
        assert!(settings.validate().is_err());
    }
}
