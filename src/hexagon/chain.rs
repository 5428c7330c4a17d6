//! Linear pipelines with middleware, and concurrent fan-out with merge.
//!
//! A [`Chain`] threads a value through an ordered list of named steps. Steps
//! exchange type-erased [`ChainValue`]s; the final value is downcast to the
//! chain's output type, failing with [`Error::TypeMismatch`] on a wrong
//! type. Middleware wraps every step in registration order — the first
//! registered middleware is the outermost — using the around pattern: each
//! middleware receives the input and a `next` function it must call to run
//! the remainder of the stack.
//!
//! A [`Parallel`] invokes a set of handlers concurrently with clones of the
//! same input, collects their outputs in submission order, and reduces them
//! with a merge function. Any handler error fails the whole group (first
//! error wins).
//!
//! # Example
//!
//! ```rust,no_run
//! use hexagon::chain::Chain;
//!
//! # async fn example() -> hexagon::Result<()> {
//! let chain: Chain<i64, String> = Chain::new("shout")
//!     .typed_step("double", |n: std::sync::Arc<i64>| async move { Ok(*n * 2) })
//!     .typed_step("render", |n: std::sync::Arc<i64>| async move {
//!         Ok(format!("result: {}", n))
//!     });
//!
//! let out = chain.run(21).await?;
//! assert_eq!(out, "result: 42");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use log::{debug, info};
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased value passed between chain steps.
pub type ChainValue = Arc<dyn Any + Send + Sync>;

/// Boxed future returned by step handlers.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<ChainValue>> + Send>>;

/// A step handler (or a middleware-wrapped stack of one).
pub type StepFn = Arc<dyn Fn(ChainValue) -> StepFuture + Send + Sync>;

/// One named step of a chain.
pub struct ChainStep {
    pub name: String,
    handler: StepFn,
}

/// Wraps step execution with external logic: observe, retry, or recover.
///
/// `next` runs the rest of the stack (ending at the step handler); a
/// middleware decides whether and how often to call it.
#[async_trait]
pub trait ChainMiddleware: Send + Sync {
    async fn around(&self, step_name: &str, input: ChainValue, next: StepFn)
        -> Result<ChainValue>;
}

/// A linear pipeline from `I` to `O`.
pub struct Chain<I, O> {
    name: String,
    steps: Vec<ChainStep>,
    middlewares: Vec<Arc<dyn ChainMiddleware>>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Chain<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            middlewares: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Append a raw step operating on type-erased values.
    pub fn step<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ChainValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChainValue>> + Send + 'static,
    {
        self.steps.push(ChainStep {
            name: name.into(),
            handler: Arc::new(move |value| Box::pin(handler(value))),
        });
        self
    }

    /// Append a step with typed input and output.
    ///
    /// The incoming value is downcast to `A` (failing with
    /// [`Error::TypeMismatch`] if a prior step produced something else) and
    /// the handler's `B` output is re-erased for the next step.
    pub fn typed_step<A, B, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: Fn(Arc<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
    {
        let name = name.into();
        let step_name = name.clone();
        let chain_name = self.name.clone();
        let handler = Arc::new(handler);
        self.step(name, move |value: ChainValue| {
            let handler = handler.clone();
            let step_name = step_name.clone();
            let chain_name = chain_name.clone();
            async move {
                let typed = value.downcast::<A>().map_err(|_| Error::TypeMismatch {
                    chain: format!("{} (input of step '{}')", chain_name, step_name),
                    expected: type_name::<A>(),
                })?;
                let output = handler(typed).await?;
                Ok(Arc::new(output) as ChainValue)
            }
        })
    }

    /// Register a middleware. The first registered wraps the outermost call.
    pub fn with_middleware(mut self, middleware: Arc<dyn ChainMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Thread `input` through every step.
    ///
    /// A step error aborts the chain wrapped with the step's index and name.
    pub async fn run(&self, input: I) -> Result<O> {
        let mut value: ChainValue = Arc::new(input);

        for (index, step) in self.steps.iter().enumerate() {
            // Compose inner-to-outer so the first registered middleware ends
            // up outermost.
            let mut invoke: StepFn = step.handler.clone();
            for middleware in self.middlewares.iter().rev() {
                let middleware = middleware.clone();
                let step_name = step.name.clone();
                let inner = invoke.clone();
                invoke = Arc::new(move |value: ChainValue| {
                    let middleware = middleware.clone();
                    let step_name = step_name.clone();
                    let inner = inner.clone();
                    Box::pin(async move { middleware.around(&step_name, value, inner).await })
                });
            }

            value = invoke(value).await.map_err(|err| Error::Step {
                index,
                name: step.name.clone(),
                source: Box::new(err),
            })?;
        }

        match value.downcast::<O>() {
            Ok(output) => Ok(output.as_ref().clone()),
            Err(_) => Err(Error::TypeMismatch {
                chain: self.name.clone(),
                expected: type_name::<O>(),
            }),
        }
    }
}

// ── Middlewares ───────────────────────────────────────────────────────────

/// Observer middleware: logs step entry and outcome, never alters the
/// result.
pub struct LoggingMiddleware;

#[async_trait]
impl ChainMiddleware for LoggingMiddleware {
    async fn around(
        &self,
        step_name: &str,
        input: ChainValue,
        next: StepFn,
    ) -> Result<ChainValue> {
        debug!("step '{}' starting", step_name);
        let result = next(input).await;
        match &result {
            Ok(_) => info!("step '{}' completed", step_name),
            Err(err) => info!("step '{}' failed: {}", step_name, err),
        }
        result
    }
}

/// Retry middleware: re-invokes the step on matching errors up to
/// `max_retries`, then returns the last error wrapped as
/// [`Error::MaxRetriesExceeded`]. Cancellation is never retried.
pub struct RetryMiddleware {
    max_retries: usize,
    should_retry: Arc<dyn Fn(&Error) -> bool + Send + Sync>,
}

impl RetryMiddleware {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            should_retry: Arc::new(|_| true),
        }
    }

    pub fn with_predicate(
        mut self,
        should_retry: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }
}

#[async_trait]
impl ChainMiddleware for RetryMiddleware {
    async fn around(
        &self,
        step_name: &str,
        input: ChainValue,
        next: StepFn,
    ) -> Result<ChainValue> {
        let mut attempts = 0usize;
        loop {
            match next(input.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_canceled() || !(self.should_retry)(&err) {
                        return Err(err);
                    }
                    if attempts >= self.max_retries {
                        return Err(Error::MaxRetriesExceeded {
                            max: self.max_retries,
                            source: Box::new(err),
                        });
                    }
                    attempts += 1;
                    debug!(
                        "step '{}' attempt {} failed, retrying: {}",
                        step_name, attempts, err
                    );
                }
            }
        }
    }
}

/// Converts runtime panics inside a step into ordinary errors.
pub struct RecoverMiddleware;

#[async_trait]
impl ChainMiddleware for RecoverMiddleware {
    async fn around(
        &self,
        step_name: &str,
        input: ChainValue,
        next: StepFn,
    ) -> Result<ChainValue> {
        match AssertUnwindSafe(next(input)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::external(
                    format!("panic in step '{}'", step_name),
                    message.into(),
                ))
            }
        }
    }
}

// ── Parallel ──────────────────────────────────────────────────────────────

/// Boxed future returned by parallel handlers.
pub type ParallelFuture<M> = Pin<Box<dyn Future<Output = Result<M>> + Send>>;

/// A parallel handler from the shared input to one branch output.
pub type ParallelFn<I, M> = Arc<dyn Fn(I) -> ParallelFuture<M> + Send + Sync>;

/// Concurrent fan-out over one input with a merging reduction.
pub struct Parallel<I, M, O> {
    name: String,
    handlers: Vec<(String, ParallelFn<I, M>)>,
    merge: Arc<dyn Fn(Vec<M>) -> Result<O> + Send + Sync>,
}

impl<I, M, O> Parallel<I, M, O>
where
    I: Clone + Send + 'static,
    M: Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        merge: impl Fn(Vec<M>) -> Result<O> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
            merge: Arc::new(merge),
        }
    }

    pub fn handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M>> + Send + 'static,
    {
        self.handlers
            .push((name.into(), Arc::new(move |input| Box::pin(handler(input)))));
        self
    }

    /// Invoke every handler concurrently with a clone of `input`.
    ///
    /// Outputs are collected in submission order and passed to the merge
    /// function. The first handler error fails the whole group; an empty
    /// handler set fails with [`Error::NoHandlers`].
    pub async fn run(&self, input: I) -> Result<O> {
        if self.handlers.is_empty() {
            return Err(Error::NoHandlers(self.name.clone()));
        }

        let futures: Vec<_> = self
            .handlers
            .iter()
            .enumerate()
            .map(|(index, (name, handler))| {
                let name = name.clone();
                let future = handler(input.clone());
                async move {
                    future.await.map_err(|err| Error::Step {
                        index,
                        name,
                        source: Box::new(err),
                    })
                }
            })
            .collect();

        let outputs = futures_util::future::try_join_all(futures).await?;
        (self.merge)(outputs)
    }
}
