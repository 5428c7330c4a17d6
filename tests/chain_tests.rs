use async_trait::async_trait;
use hexagon::chain::{
    Chain, ChainMiddleware, ChainValue, LoggingMiddleware, Parallel, RecoverMiddleware,
    RetryMiddleware, StepFn,
};
use hexagon::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

#[tokio::test]
async fn chain_threads_values_through_typed_steps() {
    let chain: Chain<i64, String> = Chain::new("pipeline")
        .typed_step("double", |n: Arc<i64>| async move { Ok(*n * 2) })
        .typed_step("stringify", |n: Arc<i64>| async move {
            Ok(format!("value={}", n))
        });

    assert_eq!(chain.run(21).await.unwrap(), "value=42");
}

#[tokio::test]
async fn step_errors_carry_index_and_name() {
    let chain: Chain<i64, i64> = Chain::new("failing")
        .typed_step("ok", |n: Arc<i64>| async move { Ok(*n) })
        .typed_step("boom", |_n: Arc<i64>| async move {
            Err::<i64, _>(Error::MissingConfig("broken step".to_string()))
        });

    let err = chain.run(1).await.unwrap_err();
    match err {
        Error::Step { index, name, .. } => {
            assert_eq!(index, 1);
            assert_eq!(name, "boom");
        }
        other => panic!("expected Step error, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_output_type_is_a_type_mismatch() {
    // The final step produces an i64 but the chain promises a String.
    let chain: Chain<i64, String> =
        Chain::new("mistyped").typed_step("identity", |n: Arc<i64>| async move { Ok(*n) });

    let err = chain.run(7).await.unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

struct OrderProbe {
    label: &'static str,
    order: Arc<StdMutex<Vec<&'static str>>>,
}

#[async_trait]
impl ChainMiddleware for OrderProbe {
    async fn around(
        &self,
        _step_name: &str,
        input: ChainValue,
        next: StepFn,
    ) -> Result<ChainValue> {
        self.order.lock().expect("order lock").push(self.label);
        next(input).await
    }
}

#[tokio::test]
async fn first_registered_middleware_is_outermost() {
    let order = Arc::new(StdMutex::new(Vec::new()));
    let chain: Chain<i64, i64> = Chain::new("wrapped")
        .typed_step("id", |n: Arc<i64>| async move { Ok(*n) })
        .with_middleware(Arc::new(OrderProbe {
            label: "outer",
            order: order.clone(),
        }))
        .with_middleware(Arc::new(OrderProbe {
            label: "inner",
            order: order.clone(),
        }));

    chain.run(1).await.unwrap();
    assert_eq!(*order.lock().expect("order lock"), vec!["outer", "inner"]);
}

#[tokio::test]
async fn retry_middleware_retries_then_wraps_the_last_error() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_step = attempts.clone();
    let chain: Chain<i64, i64> = Chain::new("flaky")
        .typed_step("always-fails", move |_n: Arc<i64>| {
            let attempts = attempts_in_step.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i64, _>(Error::MissingConfig("still broken".to_string()))
            }
        })
        .with_middleware(Arc::new(RetryMiddleware::new(2)));

    let err = chain.run(1).await.unwrap_err();
    // One initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match err {
        Error::Step { source, .. } => {
            assert!(matches!(*source, Error::MaxRetriesExceeded { max: 2, .. }));
        }
        other => panic!("expected Step error, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_middleware_succeeds_once_the_step_recovers() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_step = attempts.clone();
    let chain: Chain<i64, i64> = Chain::new("recovering")
        .typed_step("fails-twice", move |n: Arc<i64>| {
            let attempts = attempts_in_step.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::MissingConfig("transient".to_string()))
                } else {
                    Ok(*n + 1)
                }
            }
        })
        .with_middleware(Arc::new(RetryMiddleware::new(5)));

    assert_eq!(chain.run(1).await.unwrap(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_respects_the_predicate_and_never_retries_cancellation() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_step = attempts.clone();
    let chain: Chain<i64, i64> = Chain::new("selective")
        .typed_step("canceled", move |_n: Arc<i64>| {
            let attempts = attempts_in_step.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i64, _>(Error::Canceled)
            }
        })
        .with_middleware(Arc::new(RetryMiddleware::new(5)));

    assert!(chain.run(1).await.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recover_middleware_turns_panics_into_errors() {
    let chain: Chain<i64, i64> = Chain::new("panicky")
        .typed_step("explodes", |n: Arc<i64>| async move {
            if *n > 0 {
                panic!("step blew up");
            }
            Ok(*n)
        })
        .with_middleware(Arc::new(RecoverMiddleware));

    let err = chain.run(1).await.unwrap_err();
    assert!(err.to_string().contains("step blew up"));
}

#[tokio::test]
async fn logging_middleware_does_not_alter_results() {
    let chain: Chain<i64, i64> = Chain::new("logged")
        .typed_step("id", |n: Arc<i64>| async move { Ok(*n) })
        .with_middleware(Arc::new(LoggingMiddleware));
    assert_eq!(chain.run(9).await.unwrap(), 9);
}

#[tokio::test]
async fn parallel_merges_in_submission_order() {
    let parallel: Parallel<i64, i64, Vec<i64>> =
        Parallel::new("fan-out", |outputs| Ok(outputs))
            .handler("slow-double", |n| async move {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                Ok(n * 2)
            })
            .handler("fast-triple", |n| async move { Ok(n * 3) });

    // The slow handler finishes last but still lands first in the output.
    assert_eq!(parallel.run(10).await.unwrap(), vec![20, 30]);
}

#[tokio::test]
async fn parallel_fails_fast_on_the_first_error() {
    let parallel: Parallel<i64, i64, i64> =
        Parallel::new("fragile", |outputs: Vec<i64>| Ok(outputs.iter().sum()))
            .handler("ok", |n| async move { Ok(n) })
            .handler("broken", |_n| async move {
                Err::<i64, _>(Error::MissingConfig("handler down".to_string()))
            });

    let err = parallel.run(1).await.unwrap_err();
    match err {
        Error::Step { name, .. } => assert_eq!(name, "broken"),
        other => panic!("expected Step error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_parallel_is_rejected() {
    let parallel: Parallel<i64, i64, i64> =
        Parallel::new("empty", |outputs: Vec<i64>| Ok(outputs.iter().sum()));
    assert!(matches!(
        parallel.run(1).await.unwrap_err(),
        Error::NoHandlers(_)
    ));
}
