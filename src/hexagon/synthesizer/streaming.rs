//! Streaming synthesis: incremental batches and pipelined retrieve+generate.

use super::{
    offline_placeholder, SynthesisResponse, Synthesizer, DOCUMENT_SEPARATOR,
    NO_RELEVANT_INFORMATION,
};
use crate::completer::{Completer, Message};
use crate::error::{Error, Result};
use crate::retriever::{Document, Retriever};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default documents per incremental batch.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Default capacity of the pipeline's document channel.
pub const DEFAULT_BUFFER_SIZE: usize = 8;

/// Grace window after first-batch readiness that absorbs late arrivals.
const PIPELINE_GRACE: Duration = Duration::from_millis(100);

/// One piece of streamed synthesis output.
#[derive(Debug, Clone)]
pub struct SynthesisChunk {
    pub text: String,
    /// Partial chunks refine toward the final answer; exactly one chunk per
    /// stream has `is_partial = false`.
    pub is_partial: bool,
    pub source_documents: Vec<Document>,
    pub metadata: HashMap<String, Value>,
}

impl SynthesisChunk {
    fn partial(text: String, sources: Vec<Document>, iteration: usize) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("iteration".to_string(), Value::from(iteration));
        Self {
            text,
            is_partial: true,
            source_documents: sources,
            metadata,
        }
    }

    fn final_chunk(text: String, sources: Vec<Document>) -> Self {
        Self {
            text,
            is_partial: false,
            source_documents: sources,
            metadata: HashMap::new(),
        }
    }
}

/// Accepts documents as a lazy sequence and synthesizes incrementally.
///
/// Documents accumulate into batches of `batch_size`; each full batch
/// triggers an LLM call that folds the batch into the running answer and
/// emits a partial chunk. When the input channel closes, any remainder is
/// folded in and a single final chunk is emitted.
pub struct IncrementalSynthesizer {
    completer: Option<Arc<dyn Completer>>,
    batch_size: usize,
}

impl IncrementalSynthesizer {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer: Some(completer),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// A synthesizer without a backend; emits deterministic placeholders.
    pub fn offline() -> Self {
        Self {
            completer: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn incremental_prompt(query: &str, answer: &str, batch: &[Document]) -> String {
        let context = batch
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join(DOCUMENT_SEPARATOR);
        if answer.is_empty() {
            format!(
                "Context information is below.\n---------------------\n{}\n\
                 ---------------------\nGiven the context information, answer the query.\n\
                 Query: {}\nAnswer:",
                context, query
            )
        } else {
            format!(
                "The original query is as follows: {}\n\
                 We have provided an existing answer: {}\n\
                 Additional context has arrived:\n---------------------\n{}\n\
                 ---------------------\nUpdate the answer with the new context. \
                 If the context is not useful, return the existing answer.\nUpdated Answer:",
                query, answer, context
            )
        }
    }

    /// Consume `docs` and stream chunks. The stream ends after the single
    /// final (non-partial) chunk; a synthesis error ends the stream with
    /// that error instead.
    pub fn synthesize_stream(
        &self,
        query: impl Into<String>,
        mut docs: mpsc::Receiver<Document>,
    ) -> mpsc::Receiver<Result<SynthesisChunk>> {
        let (tx, rx) = mpsc::channel(self.batch_size.max(1));
        let completer = self.completer.clone();
        let batch_size = self.batch_size;
        let query = query.into();

        tokio::spawn(async move {
            let mut batch: Vec<Document> = Vec::with_capacity(batch_size);
            let mut all_docs: Vec<Document> = Vec::new();
            let mut answer = String::new();
            let mut iteration = 0usize;

            while let Some(doc) = docs.recv().await {
                batch.push(doc.clone());
                all_docs.push(doc);
                if batch.len() < batch_size {
                    continue;
                }

                iteration += 1;
                match Self::fold(&completer, &query, &answer, &batch).await {
                    Ok(next) => answer = next,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
                let chunk =
                    SynthesisChunk::partial(answer.clone(), batch.clone(), iteration);
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                batch.clear();
            }

            // Input closed: fold the remainder, then emit the final chunk.
            if !batch.is_empty() {
                match Self::fold(&completer, &query, &answer, &batch).await {
                    Ok(next) => answer = next,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
            if answer.is_empty() {
                answer = NO_RELEVANT_INFORMATION.to_string();
            }
            let _ = tx.send(Ok(SynthesisChunk::final_chunk(answer, all_docs))).await;
        });

        rx
    }

    async fn fold(
        completer: &Option<Arc<dyn Completer>>,
        query: &str,
        answer: &str,
        batch: &[Document],
    ) -> Result<String> {
        match completer {
            Some(completer) => {
                let prompt = Self::incremental_prompt(query, answer, batch);
                let response = completer
                    .complete(&[Message::user(prompt)])
                    .await
                    .map_err(|err| Error::external("incremental synthesis", err))?;
                Ok(response.content.to_string())
            }
            None => Ok(offline_placeholder(query, batch)),
        }
    }
}

/// Pipelined retrieve+generate.
///
/// The retriever runs in its own task, feeding documents through a bounded
/// channel of capacity `buffer_size`. The generator waits for the buffer to
/// fill (or the stream to end), pauses briefly to absorb late arrivals,
/// snapshots the collection, and issues exactly one synthesis call, emitted
/// as a single non-partial chunk.
pub struct PipelineSynthesizer {
    retriever: Arc<dyn Retriever>,
    synthesizer: Arc<dyn Synthesizer>,
    buffer_size: usize,
    top_k: usize,
}

impl PipelineSynthesizer {
    pub fn new(retriever: Arc<dyn Retriever>, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            retriever,
            synthesizer,
            buffer_size: DEFAULT_BUFFER_SIZE,
            top_k: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Run the two-task pipeline for `query`.
    pub fn run(&self, query: impl Into<String>) -> mpsc::Receiver<Result<SynthesisChunk>> {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (doc_tx, mut doc_rx) = mpsc::channel::<Result<Document>>(self.buffer_size);

        let retriever = self.retriever.clone();
        let query = query.into();
        let top_k = self.top_k;
        let retriever_query = query.clone();
        tokio::spawn(async move {
            match retriever.retrieve(&retriever_query, top_k).await {
                Ok(docs) => {
                    for doc in docs {
                        if doc_tx.send(Ok(doc)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = doc_tx
                        .send(Err(Error::external("pipeline retrieval", err)))
                        .await;
                }
            }
            // Sender drops here, closing the channel for the generator.
        });

        let synthesizer = self.synthesizer.clone();
        let buffer_size = self.buffer_size;
        tokio::spawn(async move {
            let mut collected: Vec<Document> = Vec::with_capacity(buffer_size);
            let mut closed = false;

            while collected.len() < buffer_size {
                match doc_rx.recv().await {
                    Some(Ok(doc)) => collected.push(doc),
                    Some(Err(err)) => {
                        let _ = out_tx.send(Err(err)).await;
                        return;
                    }
                    None => {
                        closed = true;
                        break;
                    }
                }
            }

            // Absorb late arrivals for a short grace window, then snapshot.
            if !closed {
                tokio::time::sleep(PIPELINE_GRACE).await;
                while let Ok(item) = doc_rx.try_recv() {
                    match item {
                        Ok(doc) => collected.push(doc),
                        Err(err) => {
                            let _ = out_tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }

            let result = synthesizer.synthesize(&query, &collected).await;
            let outcome = result.map(|response: SynthesisResponse| {
                let mut chunk = SynthesisChunk::final_chunk(response.content, collected);
                chunk.metadata = response.metadata;
                chunk
            });
            let _ = out_tx.send(outcome).await;
        });

        out_rx
    }
}
