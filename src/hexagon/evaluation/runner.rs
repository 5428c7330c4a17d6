//! The evaluation runner: bounded-concurrency fan-out with streaming
//! aggregation.

use super::{
    score_level, Dataset, EvalInput, EvalReport, EvalResult, Evaluator, MetricSummary, Sample,
    SampleResult, SystemResponse,
};
use crate::error::{BoxError, Error, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default pass threshold applied when an evaluator leaves `passed` unset.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.7;

/// Future type produced by a system under test.
pub type SystemFuture =
    Pin<Box<dyn Future<Output = std::result::Result<SystemResponse, BoxError>> + Send>>;

/// The system under test: any async function from query to response.
pub type SystemFn = Arc<dyn Fn(String) -> SystemFuture + Send + Sync>;

/// Executes a dataset against a system under test.
///
/// # Example
///
/// ```rust,no_run
/// use hexagon::evaluation::{Dataset, EvalRunner, ExactMatchEvaluator, Sample, SystemResponse};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> hexagon::Result<()> {
/// let runner = EvalRunner::new("smoke")
///     .with_evaluator(Arc::new(ExactMatchEvaluator::new()))
///     .with_concurrency(4);
///
/// let dataset = Dataset::new("qa")
///     .with_sample(Sample::new("s1", "What is 2+2?").with_reference("4"));
///
/// let system: hexagon::evaluation::SystemFn =
///     Arc::new(|_query| Box::pin(async { Ok(SystemResponse::text("4")) }));
///
/// let report = runner
///     .evaluate_dataset(&dataset, system, CancellationToken::new())
///     .await?;
/// assert_eq!(report.total_samples, 1);
/// # Ok(())
/// # }
/// ```
pub struct EvalRunner {
    name: String,
    evaluators: Vec<Arc<dyn Evaluator>>,
    concurrency: usize,
    /// Per-sample timeout; `None` disables the deadline.
    timeout: Option<Duration>,
    pass_threshold: f64,
    stop_on_error: bool,
}

impl EvalRunner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evaluators: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            stop_on_error: false,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pass_threshold(mut self, pass_threshold: f64) -> Self {
        self.pass_threshold = pass_threshold;
        self
    }

    /// Abort the whole run on the first sample or evaluator error instead of
    /// recording it and continuing.
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Run every sample through the system under test and all configured
    /// evaluators.
    ///
    /// Samples fan out onto a pool of `concurrency` workers; results are
    /// aggregated as they complete, so `report.results` reflects completion
    /// order. A canceled `token` propagates to every in-flight sample, which
    /// is then recorded as failed with a cancellation error.
    pub async fn evaluate_dataset(
        &self,
        dataset: &Dataset,
        system: SystemFn,
        token: CancellationToken,
    ) -> Result<EvalReport> {
        let start_time = Utc::now();
        let started = Instant::now();

        // Seed one summary per evaluator up-front so evaluators that never
        // produce a result still appear in the report.
        let mut aggregators: HashMap<String, MetricAggregator> = self
            .evaluators
            .iter()
            .map(|e| (e.name().to_string(), MetricAggregator::new(e.name())))
            .collect();

        let mut results: Vec<SampleResult> = Vec::with_capacity(dataset.samples.len());
        {
            let mut completed = stream::iter(dataset.samples.clone())
                .map(|sample| {
                    let system = system.clone();
                    let evaluators = self.evaluators.clone();
                    let timeout = self.timeout;
                    let token = token.clone();
                    async move {
                        run_sample(sample, system, evaluators, timeout, token).await
                    }
                })
                .buffer_unordered(self.concurrency);

            while let Some(sample_result) = completed.next().await {
                if self.stop_on_error {
                    if let Some(error) = first_error(&sample_result) {
                        return Err(Error::external(
                            format!("sample '{}'", sample_result.sample_id),
                            error.into(),
                        ));
                    }
                }
                for eval_result in &sample_result.results {
                    if eval_result.error.is_some() {
                        continue;
                    }
                    if let Some(aggregator) = aggregators.get_mut(&eval_result.name) {
                        aggregator.observe(eval_result, self.pass_threshold);
                    }
                }
                results.push(sample_result);
            }
        }

        let success_samples = results.iter().filter(|r| r.success).count();
        let failed_samples = results.len() - success_samples;
        let summary: HashMap<String, MetricSummary> = aggregators
            .into_iter()
            .map(|(name, aggregator)| (name, aggregator.finalize()))
            .collect();

        let end_time = Utc::now();
        debug!(
            "evaluation '{}' finished: {}/{} samples succeeded",
            self.name,
            success_samples,
            results.len()
        );
        Ok(EvalReport {
            name: self.name.clone(),
            dataset: dataset.name.clone(),
            start_time,
            end_time,
            duration_ms: started.elapsed().as_millis() as u64,
            total_samples: results.len(),
            success_samples,
            failed_samples,
            summary,
            results,
        })
    }
}

fn first_error(sample: &SampleResult) -> Option<String> {
    if let Some(error) = &sample.error {
        return Some(error.clone());
    }
    sample
        .results
        .iter()
        .find_map(|result| result.error.clone())
}

/// Run one sample end to end: system call, input composition, evaluators.
async fn run_sample(
    sample: Sample,
    system: SystemFn,
    evaluators: Vec<Arc<dyn Evaluator>>,
    timeout: Option<Duration>,
    token: CancellationToken,
) -> SampleResult {
    let started = Instant::now();
    let work = evaluate_sample(&sample, system, evaluators);

    let outcome = tokio::select! {
        _ = token.cancelled() => Err(Error::Canceled),
        result = apply_timeout(timeout, work) => result,
    };

    match outcome {
        Ok(mut result) => {
            result.duration_ms = started.elapsed().as_millis() as u64;
            result
        }
        Err(err) => {
            warn!("sample '{}' failed: {}", sample.id, err);
            SampleResult {
                sample_id: sample.id.clone(),
                success: false,
                error: Some(err.to_string()),
                response: String::new(),
                results: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
    }
}

async fn apply_timeout<F>(timeout: Option<Duration>, work: F) -> Result<SampleResult>
where
    F: Future<Output = Result<SampleResult>>,
{
    match timeout {
        Some(limit) if limit > Duration::ZERO => {
            match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    ms: limit.as_millis() as u64,
                }),
            }
        }
        _ => work.await,
    }
}

async fn evaluate_sample(
    sample: &Sample,
    system: SystemFn,
    evaluators: Vec<Arc<dyn Evaluator>>,
) -> Result<SampleResult> {
    let response = system(sample.query.clone())
        .await
        .map_err(|err| Error::external(format!("system under test for '{}'", sample.id), err))?;

    // The system's own retrieval context wins; the sample's context is
    // inherited only when the system returned none.
    let context = if response.context.is_empty() {
        sample.context.clone()
    } else {
        response.context.clone()
    };
    let input = EvalInput {
        query: sample.query.clone(),
        response: response.response.clone(),
        context,
        reference: sample.reference.clone(),
        metadata: sample.metadata.clone(),
        timing: response.timing.clone(),
        cost: response.cost.clone(),
    };

    let mut results = Vec::with_capacity(evaluators.len());
    for evaluator in evaluators {
        let eval_started = Instant::now();
        let mut result = match evaluator.evaluate(&input).await {
            Ok(result) => result,
            // An evaluator's failure is recorded in its own result slot and
            // never aborts the sample.
            Err(err) => EvalResult::errored(evaluator.name(), err.to_string()),
        };
        result.duration_ms = eval_started.elapsed().as_millis() as u64;
        results.push(result);
    }

    Ok(SampleResult {
        sample_id: sample.id.clone(),
        success: true,
        error: None,
        response: response.response,
        results,
        duration_ms: 0,
    })
}

/// Streaming per-metric aggregation. Scores are also retained so the final
/// summary reports a true median and standard deviation.
struct MetricAggregator {
    summary: MetricSummary,
    sum: f64,
    passes: usize,
    scores: Vec<f64>,
}

impl MetricAggregator {
    fn new(name: &str) -> Self {
        Self {
            summary: MetricSummary::seed(name),
            sum: 0.0,
            passes: 0,
            scores: Vec::new(),
        }
    }

    fn observe(&mut self, result: &EvalResult, pass_threshold: f64) {
        let score = result.score;
        self.summary.count += 1;
        self.sum += score;
        if score < self.summary.min {
            self.summary.min = score;
        }
        if score > self.summary.max {
            self.summary.max = score;
        }
        *self
            .summary
            .distribution
            .entry(score_level(score).to_string())
            .or_insert(0) += 1;
        if result.passed.unwrap_or(score >= pass_threshold) {
            self.passes += 1;
        }
        self.scores.push(score);
    }

    fn finalize(mut self) -> MetricSummary {
        let count = self.summary.count;
        if count == 0 {
            return self.summary;
        }
        let n = count as f64;
        self.summary.mean = self.sum / n;
        self.summary.pass_rate = Some(self.passes as f64 / n);

        self.scores.sort_by(|a, b| a.partial_cmp(b).expect("finite scores"));
        self.summary.median = if count % 2 == 1 {
            self.scores[count / 2]
        } else {
            (self.scores[count / 2 - 1] + self.scores[count / 2]) / 2.0
        };

        let variance = self
            .scores
            .iter()
            .map(|score| {
                let diff = score - self.summary.mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        self.summary.std_dev = variance.sqrt();
        self.summary
    }
}
