//! Citation engine: bracket-marked source attribution for generated text.
//!
//! The engine numbers the retrieved sources in its prompt and instructs the
//! LLM to annotate each claim with a `[N]` marker. The answer is then parsed
//! back into [`Citation`] records — each with the textual neighborhood the
//! marker annotates — plus a formatted bibliography.
//!
//! [`AutoTracker`] layers verification on top: it maps markers to
//! sentences, scores each citation by word overlap with its declared
//! source, optionally drops weak citations, and surfaces substantial
//! sentences that cite nothing as unverified claims.

use crate::completer::{Completer, Message};
use crate::error::{Error, Result};
use crate::retriever::Document;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Sentence terminators recognized when walking marker neighborhoods and
/// splitting answers, covering both ASCII and CJK punctuation.
const SENTENCE_TERMINATORS: &[char] = &['。', '.', '!', '?', '；', ';', '\n'];

/// Longest neighborhood extracted behind a marker, in characters.
const NEIGHBORHOOD_LIMIT: usize = 100;

/// Substantial sentences below no citation are surfaced when longer than
/// this many characters.
const UNVERIFIED_MIN_CHARS: usize = 10;

/// One `[N]` marker resolved to its source.
#[derive(Debug, Clone)]
pub struct Citation {
    /// The 1-based source number the marker referenced.
    pub index: usize,
    /// The literal marker, e.g. `"[2]"`.
    pub marker: String,
    /// The claim text preceding the marker, up to the nearest sentence
    /// terminator within the neighborhood limit.
    pub text: String,
    pub source_id: String,
    pub source_title: Option<String>,
    pub source_url: Option<String>,
    /// Byte offsets of the marker within the answer.
    pub start_position: usize,
    pub end_position: usize,
}

/// A generated answer with its parsed citations and bibliography.
#[derive(Debug, Clone)]
pub struct CitedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub bibliography: String,
    pub source_documents: Vec<Document>,
}

/// Retrieve-and-generate with inline source markers.
pub struct CitationEngine {
    completer: Arc<dyn Completer>,
    marker_pattern: Regex,
}

impl CitationEngine {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            marker_pattern: Regex::new(r"\[(\d+)\]").expect("static pattern"),
        }
    }

    fn prompt(query: &str, docs: &[Document]) -> String {
        let mut prompt = String::from(
            "Answer the query using the numbered sources below. Annotate every claim \
             with the bracketed number of the source that supports it, e.g. [1].\n\nSOURCES:\n",
        );
        for (i, doc) in docs.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, doc.content));
        }
        prompt.push_str(&format!("\nQUERY: {}\nANSWER:", query));
        prompt
    }

    /// Generate an answer over `docs` and parse its citations.
    pub async fn generate(&self, query: &str, docs: &[Document]) -> Result<CitedAnswer> {
        let response = self
            .completer
            .complete(&[Message::user(Self::prompt(query, docs))])
            .await
            .map_err(|err| Error::external("citation generation", err))?;
        let answer = response.content.to_string();
        let citations = self.parse_citations(&answer, docs);
        let bibliography = Self::bibliography(&citations, docs);
        Ok(CitedAnswer {
            answer,
            citations,
            bibliography,
            source_documents: docs.to_vec(),
        })
    }

    /// Parse every `[N]` marker in `answer`, resolving N against `docs`
    /// (1-based). Markers referencing unknown sources are ignored.
    pub fn parse_citations(&self, answer: &str, docs: &[Document]) -> Vec<Citation> {
        let mut citations = Vec::new();
        for captures in self.marker_pattern.captures_iter(answer) {
            let marker_match = captures.get(0).expect("whole match");
            let index: usize = match captures[1].parse() {
                Ok(index) => index,
                Err(_) => continue,
            };
            let Some(doc) = index.checked_sub(1).and_then(|i| docs.get(i)) else {
                continue;
            };

            citations.push(Citation {
                index,
                marker: marker_match.as_str().to_string(),
                text: neighborhood(answer, marker_match.start()),
                source_id: doc.id.clone(),
                source_title: doc.metadata.get("title").and_then(Value::as_str).map(str::to_string),
                source_url: doc.metadata.get("url").and_then(Value::as_str).map(str::to_string),
                start_position: marker_match.start(),
                end_position: marker_match.end(),
            });
        }
        citations
    }

    /// Numbered bibliography of the sources actually cited.
    fn bibliography(citations: &[Citation], docs: &[Document]) -> String {
        let cited: HashSet<usize> = citations.iter().map(|c| c.index).collect();
        let mut lines = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            let index = i + 1;
            if !cited.contains(&index) {
                continue;
            }
            let mut line = format!("[{}] {}", index, doc.title());
            if let Some(url) = doc.metadata.get("url").and_then(Value::as_str) {
                line.push_str(&format!(" ({})", url));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Remove every `[N]` marker from `text`.
    ///
    /// Simple regex replacement; nested brackets are not handled, which is
    /// acceptable for markers authored by the LLM under the controlled
    /// prompt.
    pub fn strip_citations(&self, text: &str) -> String {
        self.marker_pattern.replace_all(text, "").into_owned()
    }
}

/// The claim text behind a marker: walk backward from the marker to the
/// nearest sentence terminator, up to [`NEIGHBORHOOD_LIMIT`] characters.
fn neighborhood(answer: &str, marker_start: usize) -> String {
    let before = &answer[..marker_start];
    let chars: Vec<char> = before.chars().collect();
    let mut taken: Vec<char> = Vec::new();
    for &c in chars.iter().rev() {
        if SENTENCE_TERMINATORS.contains(&c) || taken.len() >= NEIGHBORHOOD_LIMIT {
            break;
        }
        taken.push(c);
    }
    taken.into_iter().rev().collect::<String>().trim().to_string()
}

// ── Auto tracking ─────────────────────────────────────────────────────────

/// A sentence of the answer with the sources its markers reference.
#[derive(Debug, Clone)]
pub struct SentenceCitations {
    pub sentence: String,
    pub source_ids: Vec<String>,
}

/// A cited answer with verification results.
#[derive(Debug, Clone)]
pub struct TrackedAnswer {
    pub answer: String,
    /// Citations that survived confidence filtering.
    pub citations: Vec<Citation>,
    pub bibliography: String,
    pub sentences: Vec<SentenceCitations>,
    /// Substantial sentences that cite no source.
    pub unverified_claims: Vec<String>,
    /// Average word overlap between citation neighborhoods and their
    /// declared sources.
    pub confidence: f64,
}

/// Decorator around [`CitationEngine`] that verifies citations against
/// their sources.
pub struct AutoTracker {
    engine: CitationEngine,
    min_confidence: Option<f64>,
    surface_unverified: bool,
}

impl AutoTracker {
    pub fn new(engine: CitationEngine) -> Self {
        Self {
            engine,
            min_confidence: None,
            surface_unverified: false,
        }
    }

    /// Drop citations whose overlap with their source falls below
    /// `min_confidence`.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// Surface substantial sentences lacking any citation.
    pub fn with_unverified_claims(mut self, surface: bool) -> Self {
        self.surface_unverified = surface;
        self
    }

    pub async fn generate(&self, query: &str, docs: &[Document]) -> Result<TrackedAnswer> {
        let cited = self.engine.generate(query, docs).await?;
        Ok(self.track(cited, docs))
    }

    fn track(&self, cited: CitedAnswer, docs: &[Document]) -> TrackedAnswer {
        // Score each citation by Jaccard word overlap between its
        // neighborhood and the source it declares.
        let mut scored: Vec<(Citation, f64)> = cited
            .citations
            .into_iter()
            .map(|citation| {
                let overlap = docs
                    .iter()
                    .find(|d| d.id == citation.source_id)
                    .map(|doc| jaccard_overlap(&citation.text, &doc.content))
                    .unwrap_or(0.0);
                (citation, overlap)
            })
            .collect();

        let confidence = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|(_, overlap)| overlap).sum::<f64>() / scored.len() as f64
        };

        if let Some(min) = self.min_confidence {
            scored.retain(|(_, overlap)| *overlap >= min);
        }
        let citations: Vec<Citation> = scored.into_iter().map(|(c, _)| c).collect();

        let sentences = split_sentences(&cited.answer)
            .into_iter()
            .map(|sentence| {
                let source_ids = citations
                    .iter()
                    .filter(|c| sentence.contains(&c.marker))
                    .map(|c| c.source_id.clone())
                    .collect::<Vec<_>>();
                SentenceCitations {
                    sentence,
                    source_ids,
                }
            })
            .collect::<Vec<_>>();

        let unverified_claims = if self.surface_unverified {
            sentences
                .iter()
                .filter(|s| {
                    s.source_ids.is_empty()
                        && s.sentence.chars().count() > UNVERIFIED_MIN_CHARS
                })
                .map(|s| s.sentence.clone())
                .collect()
        } else {
            Vec::new()
        };

        TrackedAnswer {
            answer: cited.answer,
            citations,
            bibliography: cited.bibliography,
            sentences,
            unverified_claims,
            confidence,
        }
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(SENTENCE_TERMINATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over lowercase word sets.
fn jaccard_overlap(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    intersection / union
}
