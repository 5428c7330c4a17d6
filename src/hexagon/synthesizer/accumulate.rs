//! Accumulate: one independent answer per document.

use super::{
    call_completer, empty_response, offline_placeholder, SynthesisResponse, Synthesizer,
};
use crate::completer::Completer;
use crate::error::Result;
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Answers the query against each document independently and concatenates
/// the answers. Optionally deduplicates answers by normalized-text equality
/// and caps the total with `max_answers`.
pub struct AccumulateSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    dedup: bool,
    max_answers: Option<usize>,
}

impl AccumulateSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
            dedup: false,
            max_answers: None,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self {
            completer: None,
            dedup: false,
            max_answers: None,
        }
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_max_answers(mut self, max_answers: usize) -> Self {
        self.max_answers = Some(max_answers);
        self
    }

    fn prompt(query: &str, context: &str) -> String {
        format!(
            "Context information is below.\n---------------------\n{}\n---------------------\n\
             Given the context information, answer the query.\nQuery: {}\nAnswer:",
            context, query
        )
    }

    /// Case-folded, whitespace-collapsed form used for deduplication.
    fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[async_trait]
impl Synthesizer for AccumulateSynthesizer {
    fn strategy(&self) -> &'static str {
        "accumulate"
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

        let mut answers: Vec<String> = Vec::with_capacity(docs.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut total_tokens = 0usize;

        for doc in docs {
            if let Some(max) = self.max_answers {
                if answers.len() >= max {
                    break;
                }
            }
            let (answer, tokens) = call_completer(
                completer,
                self.strategy(),
                Self::prompt(query, &doc.content),
            )
            .await?;
            total_tokens += tokens;

            if self.dedup && !seen.insert(Self::normalize(&answer)) {
                continue;
            }
            answers.push(answer);
        }

        let answer_count = answers.len();
        Ok(SynthesisResponse::new(answers.join("\n\n"), self.strategy(), docs.len())
            .with_sources(docs.to_vec())
            .with_metadata("answer_count", Value::from(answer_count))
            .with_metadata("total_tokens", Value::from(total_tokens)))
    }
}
