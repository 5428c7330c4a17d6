//! Synthesizer engine: strategies for composing an answer from documents.
//!
//! Every strategy implements [`Synthesizer`], taking a query plus retrieved
//! documents and producing a [`SynthesisResponse`] whose metadata records at
//! least the strategy name and document count. Two behaviors are uniform
//! across strategies:
//!
//! - **Empty input**: with no documents, strategies return a fixed
//!   "no relevant information" message with `doc_count = 0` and no error.
//! - **No LLM configured**: strategies return a deterministic placeholder
//!   built from the query and concatenated document contents, so pipelines
//!   stay testable without a backend.
//!
//! Strategies:
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | [`RefineSynthesizer`] | Iteratively refines an answer, one document at a time |
//! | [`CompactSynthesizer`] | One call over concatenated, truncated context |
//! | [`TreeSummarizeSynthesizer`] | Recursively summarizes groups until one remains |
//! | [`AsyncTreeSummarizeSynthesizer`] | Tree summarize with bounded parallel groups |
//! | [`AccumulateSynthesizer`] | One answer per document, optionally deduplicated |
//! | [`GenerationSynthesizer`] | Ignores documents, answers from the bare query |
//! | [`NoTextSynthesizer`] | Returns only the source documents |
//! | [`CompactAndRefineSynthesizer`] | Compact when context fits, refine otherwise |
//! | [`CustomPromptSynthesizer`] | User-supplied template with substitutions |
//!
//! Streaming variants live in [`streaming`]: [`IncrementalSynthesizer`]
//! consumes a lazy document sequence and emits partial chunks per batch;
//! [`PipelineSynthesizer`] overlaps retrieval and generation through a
//! bounded channel.

mod accumulate;
mod compact;
mod extra;
mod refine;
pub mod streaming;
mod tree;

pub use accumulate::AccumulateSynthesizer;
pub use compact::CompactSynthesizer;
pub use extra::{
    CompactAndRefineSynthesizer, CustomPromptSynthesizer, GenerationSynthesizer,
    NoTextSynthesizer,
};
pub use refine::RefineSynthesizer;
pub use streaming::{IncrementalSynthesizer, PipelineSynthesizer, SynthesisChunk};
pub use tree::{AsyncTreeSummarizeSynthesizer, TreeSummarizeSynthesizer};

use crate::completer::{Completer, Message};
use crate::error::{Error, Result};
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed response content when no documents are supplied.
pub const NO_RELEVANT_INFORMATION: &str =
    "No relevant information was found to answer the query.";

/// Separator between document bodies in concatenated context.
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

/// A synthesized answer with provenance and strategy metadata.
#[derive(Debug, Clone, Default)]
pub struct SynthesisResponse {
    pub content: String,
    pub source_documents: Vec<Document>,
    /// At minimum `strategy` and `doc_count`; strategies add their own keys
    /// such as `total_tokens` or `tree_levels`.
    pub metadata: HashMap<String, Value>,
}

impl SynthesisResponse {
    pub fn new(content: impl Into<String>, strategy: &str, doc_count: usize) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("strategy".to_string(), Value::String(strategy.to_string()));
        metadata.insert("doc_count".to_string(), Value::from(doc_count));
        Self {
            content: content.into(),
            source_documents: Vec::new(),
            metadata,
        }
    }

    pub fn with_sources(mut self, sources: Vec<Document>) -> Self {
        self.source_documents = sources;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Common interface over all synthesis strategies.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Strategy name as recorded in response metadata.
    fn strategy(&self) -> &'static str;

    async fn synthesize(&self, query: &str, docs: &[Document]) -> Result<SynthesisResponse>;
}

// ── Shared helpers used by the strategy implementations ───────────────────

/// The uniform empty-document response.
pub(crate) fn empty_response(strategy: &str) -> SynthesisResponse {
    SynthesisResponse::new(NO_RELEVANT_INFORMATION, strategy, 0)
}

/// Deterministic placeholder used when no completer is configured: the
/// query plus the concatenated document contents, so tests can assert on
/// exactly what would have been sent.
pub(crate) fn offline_placeholder(query: &str, docs: &[Document]) -> String {
    let joined = join_contents(docs);
    format!("[no llm configured] query: {}\ncontext:\n{}", query, joined)
}

/// Concatenate document bodies with the standard separator.
pub(crate) fn join_contents(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// Issue one completion, wrapping failures with the strategy that made the
/// call and returning the response text plus tokens spent.
pub(crate) async fn call_completer(
    completer: &Arc<dyn Completer>,
    strategy: &str,
    prompt: String,
) -> Result<(String, usize)> {
    let response = completer
        .complete(&[Message::user(prompt)])
        .await
        .map_err(|err| Error::external(format!("{} synthesis", strategy), err))?;
    let tokens = completer
        .last_usage()
        .await
        .map(|usage| usage.total_tokens)
        .unwrap_or(0);
    Ok((response.content.to_string(), tokens))
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub(crate) fn truncate_to_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_to_bytes(text, 3);
        assert!(cut.len() <= 3);
        assert!(text.starts_with(cut));
        assert_eq!(truncate_to_bytes("short", 100), "short");
    }

    #[test]
    fn empty_response_is_uniform() {
        let response = empty_response("refine");
        assert_eq!(response.content, NO_RELEVANT_INFORMATION);
        assert_eq!(
            response.metadata.get("doc_count").and_then(Value::as_u64),
            Some(0)
        );
    }
}
