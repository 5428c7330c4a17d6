//! Built-in evaluators: deterministic baselines plus an LLM judge.

use super::{EvalInput, EvalResult, Evaluator};
use crate::completer::{Completer, Message};
use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::Arc;

/// Scores 1 when the response equals the reference (after trimming), else 0.
pub struct ExactMatchEvaluator {
    case_sensitive: bool,
}

impl ExactMatchEvaluator {
    pub fn new() -> Self {
        Self {
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

impl Default for ExactMatchEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Evaluator for ExactMatchEvaluator {
    fn name(&self) -> &str {
        "exact_match"
    }

    async fn evaluate(&self, input: &EvalInput) -> std::result::Result<EvalResult, BoxError> {
        let (response, reference) = if self.case_sensitive {
            (input.response.trim().to_string(), input.reference.trim().to_string())
        } else {
            (
                input.response.trim().to_lowercase(),
                input.reference.trim().to_lowercase(),
            )
        };
        let matched = !reference.is_empty() && response == reference;
        let score = if matched { 1.0 } else { 0.0 };
        Ok(EvalResult::scored(self.name(), score)
            .with_passed(matched)
            .with_reason(if matched {
                "response equals reference".to_string()
            } else {
                "response differs from reference".to_string()
            }))
    }
}

/// Scores the fraction of expected keywords present in the response.
pub struct ContainsEvaluator {
    keywords: Vec<String>,
}

impl ContainsEvaluator {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }
}

#[async_trait]
impl Evaluator for ContainsEvaluator {
    fn name(&self) -> &str {
        "contains"
    }

    async fn evaluate(&self, input: &EvalInput) -> std::result::Result<EvalResult, BoxError> {
        if self.keywords.is_empty() {
            return Ok(EvalResult::scored(self.name(), 0.0)
                .with_reason("no keywords configured".to_string()));
        }
        let haystack = input.response.to_lowercase();
        let found = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(&k.to_lowercase()))
            .count();
        let score = found as f64 / self.keywords.len() as f64;
        Ok(EvalResult::scored(self.name(), score).with_reason(format!(
            "{}/{} keywords present",
            found,
            self.keywords.len()
        )))
    }
}

/// LLM-judged quality score.
///
/// Prompts a [`Completer`] to grade the response between 0 and 1 against
/// the query (and reference, when present) and parses the first number in
/// the reply.
pub struct CompleterEvaluator {
    name: String,
    completer: Arc<dyn Completer>,
    criteria: String,
}

impl CompleterEvaluator {
    pub fn new(name: impl Into<String>, completer: Arc<dyn Completer>) -> Self {
        Self {
            name: name.into(),
            completer,
            criteria: "overall answer quality".to_string(),
        }
    }

    /// What dimension the judge grades, spliced into the prompt.
    pub fn with_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = criteria.into();
        self
    }

    fn prompt(&self, input: &EvalInput) -> String {
        let mut prompt = format!(
            "You are grading {} on a scale from 0.0 to 1.0.\n\nQUERY: {}\n\nRESPONSE: {}\n",
            self.criteria, input.query, input.response
        );
        if !input.reference.is_empty() {
            prompt.push_str(&format!("\nREFERENCE ANSWER: {}\n", input.reference));
        }
        prompt.push_str("\nRespond with only the numeric score.\n");
        prompt
    }
}

/// First float in the reply, clamped to `[0, 1]`.
fn parse_score(reply: &str) -> Option<f64> {
    reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|s| !s.is_empty())
        .find_map(|s| s.parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[async_trait]
impl Evaluator for CompleterEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: &EvalInput) -> std::result::Result<EvalResult, BoxError> {
        let response = self
            .completer
            .complete(&[Message::user(self.prompt(input))])
            .await?;
        let score = parse_score(&response.content)
            .ok_or_else(|| format!("judge reply was not a score: {}", response.content))?;
        Ok(EvalResult::scored(&self.name, score)
            .with_reason(response.content.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(response: &str, reference: &str) -> EvalInput {
        EvalInput {
            query: "q".to_string(),
            response: response.to_string(),
            context: Vec::new(),
            reference: reference.to_string(),
            metadata: Default::default(),
            timing: None,
            cost: None,
        }
    }

    #[tokio::test]
    async fn exact_match_scores_binary() {
        let evaluator = ExactMatchEvaluator::new();
        let hit = evaluator.evaluate(&input("Paris", "paris")).await.unwrap();
        assert_eq!(hit.score, 1.0);
        assert_eq!(hit.passed, Some(true));

        let miss = evaluator.evaluate(&input("London", "paris")).await.unwrap();
        assert_eq!(miss.score, 0.0);
        assert_eq!(miss.passed, Some(false));
    }

    #[tokio::test]
    async fn contains_scores_fractionally() {
        let evaluator =
            ContainsEvaluator::new(vec!["rust".to_string(), "tokio".to_string()]);
        let result = evaluator
            .evaluate(&input("Rust uses async runtimes", ""))
            .await
            .unwrap();
        assert!((result.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn judge_replies_parse_to_scores() {
        assert_eq!(parse_score("0.8"), Some(0.8));
        assert_eq!(parse_score("Score: 0.75 overall"), Some(0.75));
        assert_eq!(parse_score("5"), Some(1.0));
        assert_eq!(parse_score("no number"), None);
    }
}
