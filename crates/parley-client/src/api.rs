//! HTTP collaborators of the chat service: speech synthesis, voice status,
//! health and server-side settings.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parley_core::{AudioClip, RequestSettings, SessionId};
use parley_settings::ParleySettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::speech::{SpeechError, SpeechSynthesizer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub llm_connected: bool,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub services_loaded: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.llm_connected && self.services_loaded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettingRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl SettingRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Server defaults for [`RequestSettings`] plus the ranges the UI may offer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettingsResponse {
    pub defaults: RequestSettings,
    #[serde(default)]
    pub ranges: BTreeMap<String, SettingRange>,
}

impl SettingsResponse {
    /// Numeric knobs in `settings` that fall outside the ranges the server
    /// advertises. Ranges for unknown names are skipped.
    pub fn out_of_range<'a>(&'a self, settings: &RequestSettings) -> Vec<(&'a str, f64, SettingRange)> {
        self.ranges
            .iter()
            .filter_map(|(name, range)| {
                let value = numeric_setting(settings, name)?;
                (!range.contains(value)).then_some((name.as_str(), value, *range))
            })
            .collect()
    }
}

fn numeric_setting(settings: &RequestSettings, name: &str) -> Option<f64> {
    match name {
        "initial_top_k" => Some(f64::from(settings.initial_top_k)),
        "final_top_n" => Some(f64::from(settings.final_top_n)),
        "similarity_threshold" => Some(settings.similarity_threshold),
        "hybrid_alpha" => Some(settings.hybrid_alpha),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    session_id: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    success: bool,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceStatus {
    has_voice: bool,
}

/// REST client for the inference service.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, language: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.into(),
        }
    }

    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self::new(
            settings.endpoint.api_url.clone(),
            Duration::from_millis(settings.endpoint.request_timeout_ms),
            settings.speech.language.clone(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get_json("/api/health").await
    }

    pub async fn server_settings(&self) -> Result<SettingsResponse, ApiError> {
        self.get_json("/api/settings").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SpeechSynthesizer for ApiClient {
    async fn synthesize(&self, text: &str, session_id: &SessionId) -> Result<AudioClip, SpeechError> {
        let body = TtsRequest {
            text,
            session_id: session_id.as_str(),
            language: &self.language,
        };
        debug!(session_id = %session_id, text_len = text.len(), "requesting speech");

        let resp = self
            .client
            .post(self.url("/api/tts/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TtsResponse = resp
            .json()
            .await
            .map_err(|e| SpeechError::InvalidAudio(e.to_string()))?;
        clip_from_response(parsed)
    }

    async fn has_voice_sample(&self, session_id: &SessionId) -> bool {
        let path = format!("/api/tts/has-voice/{}", session_id);
        match self.get_json::<VoiceStatus>(&path).await {
            Ok(status) => status.has_voice,
            Err(error) => {
                warn!(session_id = %session_id, error = %error, "voice status check failed");
                false
            }
        }
    }
}

fn clip_from_response(resp: TtsResponse) -> Result<AudioClip, SpeechError> {
    if !resp.success {
        return Err(SpeechError::Rejected(
            resp.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    let encoded = resp.audio.filter(|a| !a.is_empty()).ok_or(SpeechError::MissingAudio)?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| SpeechError::InvalidAudio(e.to_string()))?;
    Ok(AudioClip { data })
}
