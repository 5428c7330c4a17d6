//! Generation, no-text, compact-and-refine, and custom-prompt strategies.

use super::{
    call_completer, empty_response, join_contents, offline_placeholder, CompactSynthesizer,
    RefineSynthesizer, SynthesisResponse, Synthesizer,
};
use crate::completer::{Completer, Message};
use crate::error::{Error, Result};
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Ignores documents entirely and answers from the bare query.
pub struct GenerationSynthesizer {
    completer: Option<Arc<dyn Completer>>,
}

impl GenerationSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self { completer: None }
    }
}

#[async_trait]
impl Synthesizer for GenerationSynthesizer {
    fn strategy(&self) -> &'static str {
        "generation"
    }

    async fn synthesize(&self, query: &str, docs: &[Document]) -> Result<SynthesisResponse> {
        let Some(completer) = &self.completer else {
            return Ok(SynthesisResponse::new(
                offline_placeholder(query, &[]),
                self.strategy(),
                docs.len(),
            ));
        };
        let (answer, tokens) =
            call_completer(completer, self.strategy(), query.to_string()).await?;
        Ok(SynthesisResponse::new(answer, self.strategy(), docs.len())
            .with_metadata("total_tokens", Value::from(tokens)))
    }
}

/// Returns empty content and passes the documents through as sources, for
/// callers that only want retrieval.
pub struct NoTextSynthesizer;

#[async_trait]
impl Synthesizer for NoTextSynthesizer {
    fn strategy(&self) -> &'static str {
        "no_text"
    }

    async fn synthesize(&self, _query: &str, docs: &[Document]) -> Result<SynthesisResponse> {
        Ok(SynthesisResponse::new("", self.strategy(), docs.len())
            .with_sources(docs.to_vec()))
    }
}

/// Dispatches to compact when the summed document lengths fit in the
/// context budget, and to refine otherwise. The chosen strategy is recorded
/// in metadata as `selected_strategy`.
pub struct CompactAndRefineSynthesizer {
    compact: CompactSynthesizer,
    refine: RefineSynthesizer,
    max_context_length: usize,
}

impl CompactAndRefineSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            compact: CompactSynthesizer::new(completer.clone()),
            refine: RefineSynthesizer::new(completer),
            max_context_length: super::compact::DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self {
            compact: CompactSynthesizer::offline(),
            refine: RefineSynthesizer::offline(),
            max_context_length: super::compact::DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }

    pub fn with_max_context_length(mut self, max_context_length: usize) -> Self {
        self.compact = self.compact.with_max_context_length(max_context_length);
        self.max_context_length = max_context_length;
        self
    }
}

#[async_trait]
impl Synthesizer for CompactAndRefineSynthesizer {
    fn strategy(&self) -> &'static str {
        "compact_and_refine"
    }

    async fn synthesize(&self, query: &str, docs: &[Document]) -> Result<SynthesisResponse> {
        if docs.is_empty() {
            return Ok(empty_response(self.strategy()));
        }

        let total_length: usize = docs.iter().map(|d| d.content.len()).sum();
        let (selected, mut response) = if total_length <= self.max_context_length {
            ("compact", self.compact.synthesize(query, docs).await?)
        } else {
            ("refine", self.refine.synthesize(query, docs).await?)
        };

        response.metadata.insert(
            "strategy".to_string(),
            Value::String(self.strategy().to_string()),
        );
        response.metadata.insert(
            "selected_strategy".to_string(),
            Value::String(selected.to_string()),
        );
        Ok(response)
    }
}

/// Substitutes `{query}`, `{context}`, and `{doc_count}` into a
/// user-supplied template, optionally prepending a system-role message.
pub struct CustomPromptSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    template: String,
    system_prompt: Option<String>,
}

impl CustomPromptSynthesizer {
    pub fn new(completer: Arc<dyn Completer>, template: impl Into<String>) -> Self {
        Self {
            completer: Some(completer),
            template: template.into(),
            system_prompt: None,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline(template: impl Into<String>) -> Self {
        Self {
            completer: None,
            template: template.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    fn render(&self, query: &str, docs: &[Document]) -> String {
        self.template
            .replace("{query}", query)
            .replace("{context}", &join_contents(docs))
            .replace("{doc_count}", &docs.len().to_string())
    }
}

#[async_trait]
impl Synthesizer for CustomPromptSynthesizer {
    fn strategy(&self) -> &'static str {
        "custom_prompt"
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

        let prompt = self.render(query, docs);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let response = completer
            .complete(&messages)
            .await
            .map_err(|err| Error::external("custom prompt synthesis", err))?;
        let tokens = completer
            .last_usage()
            .await
            .map(|usage| usage.total_tokens)
            .unwrap_or(0);

        Ok(
            SynthesisResponse::new(response.content.to_string(), self.strategy(), docs.len())
                .with_sources(docs.to_vec())
                .with_metadata("total_tokens", Value::from(tokens)),
        )
    }
}
