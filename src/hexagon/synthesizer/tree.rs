//! Tree summarization: recursively collapse documents into one summary.

use super::{
    call_completer, empty_response, offline_placeholder, SynthesisResponse, Synthesizer,
    DOCUMENT_SEPARATOR,
};
use crate::completer::Completer;
use crate::error::{Error, Result};
use crate::retriever::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default group size per summarization round.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default concurrent LLM calls per level in the async variant.
pub const DEFAULT_TREE_CONCURRENCY: usize = 3;

fn summarize_prompt(query: &str, context: &str) -> String {
    format!(
        "Context information from multiple sources is below.\n\
         ---------------------\n{}\n---------------------\n\
         Summarize the information relevant to the query.\nQuery: {}\nSummary:",
        context, query
    )
}

fn final_prompt(query: &str, summary: &str) -> String {
    format!(
        "Summary of the available information:\n\
         ---------------------\n{}\n---------------------\n\
         Given the summary, answer the query.\nQuery: {}\nAnswer:",
        summary, query
    )
}

/// Clamp to at least two so every round strictly shrinks the summary list
/// and the loop terminates.
fn effective_chunk_size(chunk_size: usize) -> usize {
    chunk_size.max(2)
}

/// Sequential tree summarization.
///
/// Documents are grouped into `chunk_size` summaries per round until a
/// single summary remains, then one final call answers the query against
/// it. Response metadata records the recursion depth as `tree_levels`.
pub struct TreeSummarizeSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    chunk_size: usize,
}

impl TreeSummarizeSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self {
            completer: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl Synthesizer for TreeSummarizeSynthesizer {
    fn strategy(&self) -> &'static str {
        "tree_summarize"
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

        let chunk_size = effective_chunk_size(self.chunk_size);
        let mut summaries: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let mut levels = 0usize;
        let mut total_tokens = 0usize;

        while summaries.len() > 1 {
            levels += 1;
            let mut next = Vec::with_capacity(summaries.len() / chunk_size + 1);
            for group in summaries.chunks(chunk_size) {
                let context = group.join(DOCUMENT_SEPARATOR);
                let (summary, tokens) = call_completer(
                    completer,
                    self.strategy(),
                    summarize_prompt(query, &context),
                )
                .await?;
                total_tokens += tokens;
                next.push(summary);
            }
            summaries = next;
        }

        let (answer, tokens) = call_completer(
            completer,
            self.strategy(),
            final_prompt(query, &summaries[0]),
        )
        .await?;
        total_tokens += tokens;

        Ok(SynthesisResponse::new(answer, self.strategy(), docs.len())
            .with_sources(docs.to_vec())
            .with_metadata("tree_levels", Value::from(levels))
            .with_metadata("total_tokens", Value::from(total_tokens)))
    }
}

/// Tree summarization with bounded parallelism.
///
/// Each level's groups run concurrently, throttled by a semaphore of
/// capacity `concurrency`; levels themselves are sequential. Any group
/// failure fails the whole synthesis — a summary tree with holes in it
/// would silently drop context.
pub struct AsyncTreeSummarizeSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    chunk_size: usize,
    concurrency: usize,
}

impl AsyncTreeSummarizeSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_TREE_CONCURRENCY,
        }
    }

    /// A synthesizer without a backend; produces the deterministic offline
    /// placeholder.
    pub fn offline() -> Self {
        Self {
            completer: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_TREE_CONCURRENCY,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait]
impl Synthesizer for AsyncTreeSummarizeSynthesizer {
    fn strategy(&self) -> &'static str {
        "async_tree_summarize"
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

        let chunk_size = effective_chunk_size(self.chunk_size);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut summaries: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let mut levels = 0usize;
        let mut total_tokens = 0usize;

        while summaries.len() > 1 {
            levels += 1;
            let mut handles = Vec::with_capacity(summaries.len() / chunk_size + 1);
            for group in summaries.chunks(chunk_size) {
                let context = group.join(DOCUMENT_SEPARATOR);
                let completer = completer.clone();
                let semaphore = semaphore.clone();
                let prompt = summarize_prompt(query, &context);
                let strategy = self.strategy();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| Error::Canceled)?;
                    call_completer(&completer, strategy, prompt).await
                }));
            }

            // Group order within the level is preserved by joining handles
            // in spawn order.
            let mut next = Vec::with_capacity(handles.len());
            for handle in handles {
                let (summary, tokens) = handle.await.map_err(|err| {
                    Error::external("async tree summarize task", Box::new(err))
                })??;
                total_tokens += tokens;
                next.push(summary);
            }
            summaries = next;
        }

        let (answer, tokens) = call_completer(
            completer,
            self.strategy(),
            final_prompt(query, &summaries[0]),
        )
        .await?;
        total_tokens += tokens;

        Ok(SynthesisResponse::new(answer, self.strategy(), docs.len())
            .with_sources(docs.to_vec())
            .with_metadata("tree_levels", Value::from(levels))
            .with_metadata("total_tokens", Value::from(total_tokens)))
    }
}
