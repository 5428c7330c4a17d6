//! Iterative refinement: build up an answer one document at a time.

use super::{
    call_completer, empty_response, offline_placeholder, SynthesisResponse, Synthesizer,
};
use crate::completer::Completer;
use crate::error::Result;
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Processes documents sequentially: the first document seeds an initial
/// answer, each subsequent document refines it. Useful when every document
/// must be considered in order, at the cost of one LLM call per document.
pub struct RefineSynthesizer {
    completer: Option<Arc<dyn Completer>>,
}

impl RefineSynthesizer {
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

    fn initial_prompt(query: &str, context: &str) -> String {
        format!(
            "Context information is below.\n---------------------\n{}\n---------------------\n\
             Given the context information, answer the query.\nQuery: {}\nAnswer:",
            context, query
        )
    }

    fn refine_prompt(query: &str, existing_answer: &str, context: &str) -> String {
        format!(
            "The original query is as follows: {}\n\
             We have provided an existing answer: {}\n\
             We have the opportunity to refine the existing answer with some more context below.\n\
             ---------------------\n{}\n---------------------\n\
             Given the new context, refine the original answer. \
             If the context is not useful, return the original answer.\nRefined Answer:",
            query, existing_answer, context
        )
    }
}

#[async_trait]
impl Synthesizer for RefineSynthesizer {
    fn strategy(&self) -> &'static str {
        "refine"
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

        let mut total_tokens = 0;
        let (mut answer, tokens) = call_completer(
            completer,
            self.strategy(),
            Self::initial_prompt(query, &docs[0].content),
        )
        .await?;
        total_tokens += tokens;

        for doc in &docs[1..] {
            let (refined, tokens) = call_completer(
                completer,
                self.strategy(),
                Self::refine_prompt(query, &answer, &doc.content),
            )
            .await?;
            answer = refined;
            total_tokens += tokens;
        }

        Ok(SynthesisResponse::new(answer, self.strategy(), docs.len())
            .with_sources(docs.to_vec())
            .with_metadata("total_tokens", Value::from(total_tokens)))
    }
}
