//! Compact synthesis: one call over concatenated context.

use super::{
    call_completer, empty_response, join_contents, offline_placeholder, truncate_to_bytes,
    SynthesisResponse, Synthesizer,
};
use crate::completer::Completer;
use crate::error::Result;
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Default context budget in bytes.
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 8_000;

/// Concatenates all documents with a separator, truncates the context to a
/// byte budget, and issues a single LLM call.
pub struct CompactSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    max_context_length: usize,
}

impl CompactSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self {
            completer: None,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }

    pub fn with_max_context_length(mut self, max_context_length: usize) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    fn prompt(query: &str, context: &str) -> String {
        format!(
            "Context information is below.\n---------------------\n{}\n---------------------\n\
             Given the context information and no prior knowledge, answer the query.\n\
             Query: {}\nAnswer:",
            context, query
        )
    }
}

#[async_trait]
impl Synthesizer for CompactSynthesizer {
    fn strategy(&self) -> &'static str {
        "compact"
    }

    async fn synthesize(&self, query: &str, docs: &[Document]) -> Result<SynthesisResponse> {
        if docs.is_empty() {
            return Ok(empty_response(self.strategy()));
        }
        let Some(completer) = &self.completer else {
            return Ok(
                SynthesisResponse::new(offline_placeholder(query, docs), self.strategy(), docs.len())
                    .with_sources(docs.to_vec()),
            );
        };

        let joined = join_contents(docs);
        let context = truncate_to_bytes(&joined, self.max_context_length);
        let (answer, tokens) =
            call_completer(completer, self.strategy(), Self::prompt(query, context)).await?;

        Ok(SynthesisResponse::new(answer, self.strategy(), docs.len())
            .with_sources(docs.to_vec())
            .with_metadata("total_tokens", Value::from(tokens)))
    }
}
