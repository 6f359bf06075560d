//! JSON shapes exchanged with the inference service.
//!
//! Outbound frames are [`ChatRequest`]s. Inbound frames are `{type, content}`
//! records; the typed view of them lives in [`crate::events`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the service should render citations inside the answer text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    #[default]
    Clean,
    None,
}

/// Retrieval and generation knobs sent with every request.
///
/// The client never interprets these; they are forwarded as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    pub use_reranking: bool,
    pub initial_top_k: u32,
    pub final_top_n: u32,
    pub similarity_threshold: f64,
    pub use_hybrid_search: bool,
    pub hybrid_alpha: f64,
    pub use_query_enhancement: bool,
    pub citation_style: CitationStyle,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            use_reranking: true,
            initial_top_k: 25,
            final_top_n: 5,
            similarity_threshold: 0.3,
            use_hybrid_search: true,
            hybrid_alpha: 0.5,
            use_query_enhancement: true,
            citation_style: CitationStyle::Clean,
        }
    }
}

/// Outbound request frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub settings: RequestSettings,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, settings: RequestSettings) -> Self {
        Self {
            query: query.into(),
            settings,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A retrieved passage backing part of an answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_method: Option<String>,
}

impl Source {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
            similarity: None,
            rerank_score: None,
            bm25_score: None,
            retrieval_method: None,
        }
    }

    /// The originating document, when the service reported one.
    pub fn source_file(&self) -> Option<&str> {
        self.metadata.get("source_file").and_then(Value::as_str)
    }

    pub fn page_num(&self) -> Option<u64> {
        self.metadata.get("page_num").and_then(Value::as_u64)
    }

    /// Best available relevance score: rerank, then similarity, then lexical.
    pub fn best_score(&self) -> Option<f64> {
        self.rerank_score.or(self.similarity).or(self.bm25_score)
    }
}

/// Untyped inbound frame, before tag dispatch.
#[derive(Clone, Debug, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}
