//! Evaluation harness: datasets, evaluators, and the report model.
//!
//! An evaluation wraps a *system under test* — any async function from
//! query to [`SystemResponse`] — and pushes a dataset's samples through it
//! on a bounded worker pool, scoring each response with every configured
//! [`Evaluator`]. Aggregation is streaming: metric summaries update as
//! results arrive, and the final [`EvalReport`] carries per-sample results
//! in completion order.
//!
//! See [`EvalRunner`](runner::EvalRunner) for the execution engine and
//! [`evaluators`] for the built-in evaluator set.

pub mod evaluators;
pub mod runner;

pub use evaluators::{CompleterEvaluator, ContainsEvaluator, ExactMatchEvaluator};
pub use runner::{EvalRunner, SystemFn, SystemFuture};

use crate::error::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A named collection of evaluation samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            samples: Vec::new(),
        }
    }

    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }
}

/// One evaluation case: a query with optional reference answer and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Sample {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            reference: String::new(),
            context: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

/// Wall-clock timing reported by the system under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Token and dollar accounting reported by the system under test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cost {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub cost: f64,
}

/// What the system under test returns for a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemResponse {
    pub response: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SystemResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }
}

/// Everything an evaluator sees for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalInput {
    pub query: String,
    pub response: String,
    /// The system's retrieval context; inherited from the sample when the
    /// system returned none.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

/// One evaluator's verdict on one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    /// Evaluator name.
    pub name: String,
    /// Bounded score in `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub sub_scores: HashMap<String, f64>,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Set when the evaluator itself failed; errored results are excluded
    /// from metric aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalResult {
    pub fn scored(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score: score.clamp(0.0, 1.0),
            passed: None,
            reason: String::new(),
            sub_scores: HashMap::new(),
            details: HashMap::new(),
            duration_ms: 0,
            error: None,
        }
    }

    pub fn errored(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: 0.0,
            passed: None,
            reason: String::new(),
            sub_scores: HashMap::new(),
            details: HashMap::new(),
            duration_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }
}

/// All evaluator verdicts for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResult {
    pub sample_id: String,
    /// False when the system under test failed or timed out; evaluators are
    /// skipped for failed samples.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub results: Vec<EvalResult>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Aggregated statistics for one evaluator across a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_rate: Option<f64>,
    /// Number of non-error results this evaluator produced.
    pub count: usize,
    /// Score-level name to occurrence count.
    #[serde(default)]
    pub distribution: HashMap<String, usize>,
}

impl MetricSummary {
    /// The seed summary: `min` starts above `max` so the first real score
    /// initializes both.
    pub fn seed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            min: 1.0,
            max: 0.0,
            pass_rate: None,
            count: 0,
            distribution: HashMap::new(),
        }
    }
}

/// The full outcome of one dataset evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub name: String,
    pub dataset: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_samples: usize,
    pub success_samples: usize,
    pub failed_samples: usize,
    /// Evaluator name to summary.
    pub summary: HashMap<String, MetricSummary>,
    /// Per-sample results in completion order, not submission order.
    pub results: Vec<SampleResult>,
}

/// Bucket name for a score, used for distribution histograms.
pub fn score_level(score: f64) -> &'static str {
    if score >= 0.9 {
        "excellent"
    } else if score >= 0.7 {
        "good"
    } else if score >= 0.5 {
        "fair"
    } else {
        "poor"
    }
}

/// Maps `(query, response, context, reference)` to a bounded score with an
/// optional pass/fail judgment.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, input: &EvalInput) -> std::result::Result<EvalResult, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_levels_band_correctly() {
        assert_eq!(score_level(0.95), "excellent");
        assert_eq!(score_level(0.9), "excellent");
        assert_eq!(score_level(0.7), "good");
        assert_eq!(score_level(0.5), "fair");
        assert_eq!(score_level(0.49), "poor");
    }

    #[test]
    fn seed_summary_starts_inverted() {
        let seed = MetricSummary::seed("m");
        assert_eq!(seed.min, 1.0);
        assert_eq!(seed.max, 0.0);
        assert_eq!(seed.count, 0);
        assert!(seed.distribution.is_empty());
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(EvalResult::scored("m", 1.5).score, 1.0);
        assert_eq!(EvalResult::scored("m", -0.5).score, 0.0);
    }
}
