//! Self-RAG: a reflective retrieve/generate loop gated by a critic.
//!
//! Each attempt decides whether retrieval is needed, filters retrieved
//! documents by relevance, generates an answer, then critiques it for
//! faithfulness (to the kept documents) and completeness (against the
//! query). The loop returns as soon as both scores meet their thresholds,
//! and otherwise returns the best-scoring attempt seen; it fails only when
//! every attempt errors.

use crate::completer::{Completer, Message};
use crate::error::{BoxError, Error, Result};
use crate::retriever::{Document, Retriever};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

/// Judges a model's decisions along one axis at a time.
#[async_trait]
pub trait Critic: Send + Sync {
    /// Should this query trigger retrieval? Returns the decision and a
    /// confidence in it.
    async fn needs_retrieval(
        &self,
        query: &str,
    ) -> std::result::Result<(bool, f64), BoxError>;

    /// Is the document relevant to the query? Returns the decision and a
    /// relevance score.
    async fn is_relevant(
        &self,
        query: &str,
        doc: &Document,
    ) -> std::result::Result<(bool, f64), BoxError>;

    /// How faithful is the answer to the documents it cites?
    async fn is_faithful(
        &self,
        answer: &str,
        docs: &[Document],
    ) -> std::result::Result<f64, BoxError>;

    /// How completely does the answer address the query?
    async fn is_complete(
        &self,
        query: &str,
        answer: &str,
    ) -> std::result::Result<f64, BoxError>;
}

/// Tuning for the reflective loop.
#[derive(Debug, Clone)]
pub struct SelfRagConfig {
    pub max_retries: usize,
    pub top_k: usize,
    /// Documents below this relevance score are dropped.
    pub relevance_threshold: f64,
    pub faithfulness_threshold: f64,
    pub completeness_threshold: f64,
}

impl Default for SelfRagConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            top_k: 5,
            relevance_threshold: 0.5,
            faithfulness_threshold: 0.7,
            completeness_threshold: 0.7,
        }
    }
}

/// One generated answer with its critique scores.
#[derive(Debug, Clone)]
pub struct SelfRagResponse {
    pub answer: String,
    /// The documents that survived relevance filtering and informed the
    /// answer.
    pub documents: Vec<Document>,
    pub faithfulness: f64,
    pub completeness: f64,
    /// Which attempt (1-based) produced this response.
    pub attempt: usize,
}

impl SelfRagResponse {
    fn quality(&self) -> f64 {
        (self.faithfulness + self.completeness) / 2.0
    }
}

/// The reflective loop engine.
pub struct SelfRag {
    completer: Arc<dyn Completer>,
    retriever: Arc<dyn Retriever>,
    critic: Arc<dyn Critic>,
    config: SelfRagConfig,
}

impl SelfRag {
    pub fn new(
        completer: Arc<dyn Completer>,
        retriever: Arc<dyn Retriever>,
        critic: Arc<dyn Critic>,
    ) -> Self {
        Self {
            completer,
            retriever,
            critic,
            config: SelfRagConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SelfRagConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the loop for a query.
    ///
    /// Returns the first attempt whose faithfulness and completeness both
    /// meet their thresholds, or the best-scoring attempt otherwise. Errors
    /// only when every attempt errors.
    pub async fn run(&self, query: &str) -> Result<SelfRagResponse> {
        let mut best: Option<SelfRagResponse> = None;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            match self.attempt(query, attempt).await {
                Ok(response) => {
                    if response.faithfulness >= self.config.faithfulness_threshold
                        && response.completeness >= self.config.completeness_threshold
                    {
                        return Ok(response);
                    }
                    debug!(
                        "self-rag attempt {} below thresholds (faithfulness {:.2}, completeness {:.2})",
                        attempt, response.faithfulness, response.completeness
                    );
                    let better = best
                        .as_ref()
                        .map(|b| response.quality() > b.quality())
                        .unwrap_or(true);
                    if better {
                        best = Some(response);
                    }
                }
                Err(err) => {
                    warn!("self-rag attempt {} errored: {}", attempt, err);
                    last_error = Some(err);
                }
            }
        }

        match best {
            Some(response) => Ok(response),
            None => Err(last_error.unwrap_or(Error::NotFound("self-rag response".to_string()))),
        }
    }

    async fn attempt(&self, query: &str, attempt: usize) -> Result<SelfRagResponse> {
        // A critic that cannot decide defaults to retrieving; skipping
        // retrieval on a flaky critic would starve the generator of context.
        let needed = match self.critic.needs_retrieval(query).await {
            Ok((needed, confidence)) => {
                debug!(
                    "retrieval {} (confidence {:.2})",
                    if needed { "needed" } else { "not needed" },
                    confidence
                );
                needed
            }
            Err(err) => {
                warn!("needs_retrieval failed, defaulting to retrieve: {}", err);
                true
            }
        };

        let documents = if needed {
            let candidates = self
                .retriever
                .retrieve(query, self.config.top_k)
                .await
                .map_err(|err| Error::external("self-rag retrieval", err))?;
            let mut kept = Vec::with_capacity(candidates.len());
            for doc in candidates {
                let (_, score) = self
                    .critic
                    .is_relevant(query, &doc)
                    .await
                    .map_err(|err| Error::external("relevance critique", err))?;
                if score >= self.config.relevance_threshold {
                    kept.push(doc);
                }
            }
            kept
        } else {
            Vec::new()
        };

        let answer = self.generate(query, &documents).await?;

        let faithfulness = if documents.is_empty() {
            // Nothing to be faithful to.
            1.0
        } else {
            self.critic
                .is_faithful(&answer, &documents)
                .await
                .map_err(|err| Error::external("faithfulness critique", err))?
        };
        let completeness = self
            .critic
            .is_complete(query, &answer)
            .await
            .map_err(|err| Error::external("completeness critique", err))?;

        Ok(SelfRagResponse {
            answer,
            documents,
            faithfulness,
            completeness,
            attempt,
        })
    }

    async fn generate(&self, query: &str, documents: &[Document]) -> Result<String> {
        let prompt = if documents.is_empty() {
            query.to_string()
        } else {
            let context = documents
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            format!(
                "Answer the query using the context below.\n\nCONTEXT:\n{}\n\nQUERY: {}\nANSWER:",
                context, query
            )
        };
        let response = self
            .completer
            .complete(&[Message::user(prompt)])
            .await
            .map_err(|err| Error::external("self-rag generation", err))?;
        Ok(response.content.to_string())
    }
}

/// LLM-backed critic: each judgment is one completion parsed for a leading
/// numeric score.
pub struct CompleterCritic {
    completer: Arc<dyn Completer>,
}

impl CompleterCritic {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }

    async fn score(&self, prompt: String) -> std::result::Result<f64, BoxError> {
        let response = self.completer.complete(&[Message::user(prompt)]).await?;
        first_number(&response.content)
            .ok_or_else(|| format!("critic reply was not a score: {}", response.content).into())
    }
}

fn first_number(reply: &str) -> Option<f64> {
    reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|s| !s.is_empty())
        .find_map(|s| s.parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[async_trait]
impl Critic for CompleterCritic {
    async fn needs_retrieval(
        &self,
        query: &str,
    ) -> std::result::Result<(bool, f64), BoxError> {
        let score = self
            .score(format!(
                "Does answering this query require looking up external documents? \
                 Reply with a confidence between 0.0 (no) and 1.0 (yes).\nQUERY: {}",
                query
            ))
            .await?;
        Ok((score >= 0.5, score))
    }

    async fn is_relevant(
        &self,
        query: &str,
        doc: &Document,
    ) -> std::result::Result<(bool, f64), BoxError> {
        let score = self
            .score(format!(
                "Rate how relevant the document is to the query between 0.0 and 1.0.\n\
                 QUERY: {}\nDOCUMENT: {}",
                query, doc.content
            ))
            .await?;
        Ok((score >= 0.5, score))
    }

    async fn is_faithful(
        &self,
        answer: &str,
        docs: &[Document],
    ) -> std::result::Result<f64, BoxError> {
        let context = docs
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.score(format!(
            "Rate between 0.0 and 1.0 how faithful the answer is to the sources \
             (1.0 = every claim is supported).\nSOURCES:\n{}\nANSWER: {}",
            context, answer
        ))
        .await
    }

    async fn is_complete(
        &self,
        query: &str,
        answer: &str,
    ) -> std::result::Result<f64, BoxError> {
        self.score(format!(
            "Rate between 0.0 and 1.0 how completely the answer addresses the query.\n\
             QUERY: {}\nANSWER: {}",
            query, answer
        ))
        .await
    }
}
