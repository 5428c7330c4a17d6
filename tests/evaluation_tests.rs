use async_trait::async_trait;
use hexagon::error::BoxError;
use hexagon::evaluation::{
    Dataset, EvalInput, EvalResult, EvalRunner, Evaluator, ExactMatchEvaluator, Sample,
    SystemFn, SystemResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scores 0.9 for odd sample indices and 0.5 for even ones.
struct AlternatingEvaluator;

#[async_trait]
impl Evaluator for AlternatingEvaluator {
    fn name(&self) -> &str {
        "alternating"
    }

    async fn evaluate(&self, input: &EvalInput) -> Result<EvalResult, BoxError> {
        let index: usize = input
            .metadata
            .get("index")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize;
        let score = if index % 2 == 1 { 0.9 } else { 0.5 };
        Ok(EvalResult::scored(self.name(), score))
    }
}

fn echo_system() -> SystemFn {
    Arc::new(|query| Box::pin(async move { Ok(SystemResponse::text(format!("echo: {}", query))) }))
}

fn indexed_dataset(samples: usize) -> Dataset {
    let mut dataset = Dataset::new("indexed");
    for index in 0..samples {
        let mut sample = Sample::new(format!("sample-{}", index), format!("query {}", index));
        sample
            .metadata
            .insert("index".to_string(), serde_json::json!(index));
        dataset.samples.push(sample);
    }
    dataset
}

#[tokio::test]
async fn alternating_scores_aggregate_to_expected_summary() {
    let runner = EvalRunner::new("alternating-run")
        .with_evaluator(Arc::new(AlternatingEvaluator))
        .with_concurrency(4)
        .with_pass_threshold(0.7);

    let report = runner
        .evaluate_dataset(&indexed_dataset(10), echo_system(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_samples, 10);
    assert_eq!(report.success_samples, 10);
    assert_eq!(report.failed_samples, 0);

    let summary = &report.summary["alternating"];
    assert_eq!(summary.count, 10);
    assert!((summary.mean - 0.7).abs() < 1e-9);
    assert_eq!(summary.min, 0.5);
    assert_eq!(summary.max, 0.9);
    assert!((summary.pass_rate.unwrap() - 0.5).abs() < 1e-9);
    assert!(summary.min <= summary.mean && summary.mean <= summary.max);
    assert_eq!(summary.distribution.get("excellent"), Some(&5));
    assert_eq!(summary.distribution.get("fair"), Some(&5));
}

#[tokio::test]
async fn system_failures_mark_samples_failed_and_skip_evaluators() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_system = calls.clone();
    let system: SystemFn = Arc::new(move |query| {
        calls_in_system.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if query.contains("1") {
                Err("backend down".into())
            } else {
                Ok(SystemResponse::text("fine"))
            }
        })
    });

    let runner = EvalRunner::new("failures")
        .with_evaluator(Arc::new(AlternatingEvaluator))
        .with_concurrency(2);

    let report = runner
        .evaluate_dataset(&indexed_dataset(3), system, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_samples, 3);
    assert_eq!(report.success_samples, 2);
    assert_eq!(report.failed_samples, 1);
    assert_eq!(report.success_samples + report.failed_samples, report.total_samples);

    let failed = report
        .results
        .iter()
        .find(|r| !r.success)
        .expect("one failed sample");
    assert!(failed.results.is_empty());
    assert!(failed.error.as_deref().unwrap_or("").contains("backend down"));

    // Only non-error results count toward the metric.
    assert_eq!(report.summary["alternating"].count, 2);
}

struct BrokenEvaluator;

#[async_trait]
impl Evaluator for BrokenEvaluator {
    fn name(&self) -> &str {
        "broken"
    }

    async fn evaluate(&self, _input: &EvalInput) -> Result<EvalResult, BoxError> {
        Err("judge crashed".into())
    }
}

#[tokio::test]
async fn evaluator_errors_are_recorded_not_fatal() {
    let runner = EvalRunner::new("mixed")
        .with_evaluator(Arc::new(BrokenEvaluator))
        .with_evaluator(Arc::new(AlternatingEvaluator));

    let report = runner
        .evaluate_dataset(&indexed_dataset(2), echo_system(), CancellationToken::new())
        .await
        .unwrap();

    // The sample still succeeds and the healthy evaluator still scores it.
    assert_eq!(report.success_samples, 2);
    assert_eq!(report.summary["alternating"].count, 2);
    // The broken evaluator keeps its seed summary.
    assert_eq!(report.summary["broken"].count, 0);

    let sample = &report.results[0];
    let broken = sample.results.iter().find(|r| r.name == "broken").unwrap();
    assert!(broken.error.as_deref().unwrap_or("").contains("judge crashed"));
    assert_eq!(broken.score, 0.0);
}

#[tokio::test]
async fn stop_on_error_aborts_the_run() {
    let runner = EvalRunner::new("strict")
        .with_evaluator(Arc::new(BrokenEvaluator))
        .with_stop_on_error(true);

    let result = runner
        .evaluate_dataset(&indexed_dataset(2), echo_system(), CancellationToken::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn per_sample_timeouts_fail_slow_samples() {
    let system: SystemFn = Arc::new(|_query| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SystemResponse::text("too late"))
        })
    });

    let runner = EvalRunner::new("deadline")
        .with_evaluator(Arc::new(AlternatingEvaluator))
        .with_timeout(Duration::from_millis(50));

    let report = runner
        .evaluate_dataset(&indexed_dataset(1), system, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_samples, 1);
    assert!(report.results[0]
        .error
        .as_deref()
        .unwrap_or("")
        .contains("timed out"));
}

#[tokio::test]
async fn cancellation_propagates_to_workers() {
    let token = CancellationToken::new();
    token.cancel();

    let system: SystemFn = Arc::new(|_query| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SystemResponse::text("never"))
        })
    });

    let runner = EvalRunner::new("canceled").with_evaluator(Arc::new(AlternatingEvaluator));
    let report = runner
        .evaluate_dataset(&indexed_dataset(2), system, token)
        .await
        .unwrap();

    assert_eq!(report.failed_samples, 2);
    for result in &report.results {
        assert!(result.error.as_deref().unwrap_or("").contains("canceled"));
    }
}

#[tokio::test]
async fn sample_context_is_inherited_when_system_returns_none() {
    struct ContextCapture;

    #[async_trait]
    impl Evaluator for ContextCapture {
        fn name(&self) -> &str {
            "context_capture"
        }

        async fn evaluate(&self, input: &EvalInput) -> Result<EvalResult, BoxError> {
            let score = if input.context == vec!["from the sample".to_string()] {
                1.0
            } else {
                0.0
            };
            Ok(EvalResult::scored(self.name(), score))
        }
    }

    let dataset = Dataset::new("ctx").with_sample(
        Sample::new("s1", "q").with_context("from the sample"),
    );
    let runner = EvalRunner::new("ctx").with_evaluator(Arc::new(ContextCapture));
    let report = runner
        .evaluate_dataset(&dataset, echo_system(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.results[0].results[0].score, 1.0);
}

#[tokio::test]
async fn exact_match_runs_end_to_end() {
    let dataset = Dataset::new("qa")
        .with_sample(Sample::new("s1", "What is 2+2?").with_reference("4"))
        .with_sample(Sample::new("s2", "Capital of France?").with_reference("Paris"));

    let system: SystemFn = Arc::new(|query| {
        Box::pin(async move {
            let answer = if query.contains("2+2") { "4" } else { "London" };
            Ok(SystemResponse::text(answer))
        })
    });

    let runner = EvalRunner::new("exact").with_evaluator(Arc::new(ExactMatchEvaluator::new()));
    let report = runner
        .evaluate_dataset(&dataset, system, CancellationToken::new())
        .await
        .unwrap();

    let summary = &report.summary["exact_match"];
    assert_eq!(summary.count, 2);
    assert!((summary.mean - 0.5).abs() < 1e-9);
    assert!((summary.pass_rate.unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn report_serializes_to_json() {
    let runner = EvalRunner::new("serde").with_evaluator(Arc::new(AlternatingEvaluator));
    let report = runner
        .evaluate_dataset(&indexed_dataset(2), echo_system(), CancellationToken::new())
        .await
        .unwrap();

    let text = serde_json::to_string(&report).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["total_samples"], 2);
    assert!(value["summary"]["alternating"]["mean"].is_number());
}
