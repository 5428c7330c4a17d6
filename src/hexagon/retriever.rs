//! The retrieval seam: ranked documents for a query.
//!
//! Vector stores and embedders are external collaborators. The core consumes
//! the [`Retriever`] trait and the [`Document`] value type it produces;
//! synthesizers and the Self-RAG loop never see anything more concrete.

use crate::error::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A retrieved document with its relevance score and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Relevance score assigned by the retriever; higher is better.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            embedding: None,
            score: 0.0,
            source: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Title for bibliographies: the `title` metadata entry when present,
    /// otherwise the document id.
    pub fn title(&self) -> String {
        self.metadata
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Produces ranked documents for a query. Implementations are external
/// (vector stores, keyword indexes, web search); tests use fixed fixtures.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<Document>, BoxError>;
}
