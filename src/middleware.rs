// Copyright 2025 Cowboy AI, LLC.

//! Middleware pipeline for command and query dispatch
//!
//! Middleware are ordered objects that wrap the next pipeline stage and
//! return a new stage. The buses fold the middleware list iteratively at
//! build time, so the first middleware added becomes the outermost wrapper:
//!
//! ```text
//! pipeline = mw0.wrap(mw1.wrap(... final))
//! final    = handler.validate then handler.handle
//! ```

use crate::cqrs::{Command, CommandEnvelope, CommandHandler, Query, QueryEnvelope, QueryHandler};
use crate::errors::{DispatchError, DispatchResult};
use crate::metrics::MetricsSink;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// One stage of a command pipeline
pub type CommandStage<C> =
    Arc<dyn Fn(Arc<CommandEnvelope<C>>) -> BoxFuture<'static, DispatchResult<Value>> + Send + Sync>;

/// One stage of a query pipeline
pub type QueryStage<Q> =
    Arc<dyn Fn(Arc<QueryEnvelope<Q>>) -> BoxFuture<'static, DispatchResult<Value>> + Send + Sync>;

/// Wrapper around one stage of command dispatch
pub trait CommandMiddleware<C: Command>: Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Wrap the next stage, returning the composed stage
    fn wrap(&self, next: CommandStage<C>) -> CommandStage<C>;
}

/// Wrapper around one stage of query dispatch
pub trait QueryMiddleware<Q: Query>: Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Wrap the next stage, returning the composed stage
    fn wrap(&self, next: QueryStage<Q>) -> QueryStage<Q>;
}

/// Build the command pipeline for one handler
///
/// The final stage runs `validate` then `handle`; middleware wrap it in
/// reverse list order so that the first-added middleware runs outermost.
pub(crate) fn build_command_pipeline<C: Command>(
    handler: Arc<dyn CommandHandler<C>>,
    middleware: &[Arc<dyn CommandMiddleware<C>>],
) -> CommandStage<C> {
    let mut stage: CommandStage<C> = Arc::new(move |envelope: Arc<CommandEnvelope<C>>| {
        let handler = handler.clone();
        async move {
            handler.validate(&envelope).await?;
            handler.handle(&envelope).await
        }
        .boxed()
    });

    for mw in middleware.iter().rev() {
        stage = mw.wrap(stage);
    }
    stage
}

/// Build the query pipeline for one handler
pub(crate) fn build_query_pipeline<Q: Query>(
    handler: Arc<dyn QueryHandler<Q>>,
    middleware: &[Arc<dyn QueryMiddleware<Q>>],
) -> QueryStage<Q> {
    let mut stage: QueryStage<Q> = Arc::new(move |envelope: Arc<QueryEnvelope<Q>>| {
        let handler = handler.clone();
        async move {
            handler.validate(&envelope).await?;
            handler.handle(&envelope).await
        }
        .boxed()
    });

    for mw in middleware.iter().rev() {
        stage = mw.wrap(stage);
    }
    stage
}

fn check_identity(id: Uuid, kind: &str) -> DispatchResult<()> {
    if id.is_nil() {
        return Err(DispatchError::validation("message id is nil"));
    }
    if kind.is_empty() {
        return Err(DispatchError::validation("message kind is empty"));
    }
    Ok(())
}

/// Middleware that re-checks envelope self-consistency and fails fast
///
/// Payload constraints belong to the handler's `validate`; this stage only
/// guards the identity fields every envelope must carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationMiddleware;

impl<C: Command> CommandMiddleware<C> for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn wrap(&self, next: CommandStage<C>) -> CommandStage<C> {
        Arc::new(move |envelope| {
            let next = next.clone();
            async move {
                check_identity(envelope.id, envelope.kind())?;
                next(envelope).await
            }
            .boxed()
        })
    }
}

impl<Q: Query> QueryMiddleware<Q> for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn wrap(&self, next: QueryStage<Q>) -> QueryStage<Q> {
        Arc::new(move |envelope| {
            let next = next.clone();
            async move {
                check_identity(envelope.id, envelope.kind())?;
                next(envelope).await
            }
            .boxed()
        })
    }
}

/// Middleware that logs elapsed time for every dispatch, success or not
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingMiddleware;

impl<C: Command> CommandMiddleware<C> for TimingMiddleware {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn wrap(&self, next: CommandStage<C>) -> CommandStage<C> {
        Arc::new(move |envelope| {
            let next = next.clone();
            async move {
                let kind = envelope.kind();
                let started = Instant::now();
                let result = next(envelope).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => debug!(kind, elapsed_ms, "command completed"),
                    Err(error) => debug!(kind, elapsed_ms, %error, "command failed"),
                }
                result
            }
            .boxed()
        })
    }
}

impl<Q: Query> QueryMiddleware<Q> for TimingMiddleware {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn wrap(&self, next: QueryStage<Q>) -> QueryStage<Q> {
        Arc::new(move |envelope| {
            let next = next.clone();
            async move {
                let kind = envelope.kind();
                let started = Instant::now();
                let result = next(envelope).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => debug!(kind, elapsed_ms, "query completed"),
                    Err(error) => debug!(kind, elapsed_ms, %error, "query failed"),
                }
                result
            }
            .boxed()
        })
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (zero-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Middleware that retries failed handlers with exponential backoff
///
/// Only retryable errors are retried; validation failures surface
/// immediately. Retries are blind: there is no idempotency-key dedup, so
/// handlers that are not idempotent should not sit behind this middleware.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    /// Create a retry middleware with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<C: Command> CommandMiddleware<C> for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: CommandStage<C>) -> CommandStage<C> {
        let policy = self.policy.clone();
        Arc::new(move |envelope| {
            let next = next.clone();
            let policy = policy.clone();
            async move {
                let mut attempt: u32 = 0;
                loop {
                    match next(envelope.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                            let delay = policy.delay_for_attempt(attempt);
                            warn!(
                                kind = envelope.kind(),
                                attempt = attempt + 1,
                                delay_ms = delay.as_millis() as u64,
                                %error,
                                "retrying command"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
            .boxed()
        })
    }
}

/// Middleware that flags oversized query results for downstream compression
///
/// Results above the byte threshold are logged and counted; the payload
/// itself is left untouched.
#[derive(Clone)]
pub struct CompressionMiddleware {
    threshold_bytes: usize,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CompressionMiddleware {
    /// Create a compression-flagging middleware with the given threshold
    pub fn new(threshold_bytes: usize) -> Self {
        Self {
            threshold_bytes,
            metrics: None,
        }
    }

    /// Attach a metrics sink that counts flagged results
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<Q: Query> QueryMiddleware<Q> for CompressionMiddleware {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn wrap(&self, next: QueryStage<Q>) -> QueryStage<Q> {
        let threshold = self.threshold_bytes;
        let metrics = self.metrics.clone();
        Arc::new(move |envelope| {
            let next = next.clone();
            let metrics = metrics.clone();
            async move {
                let kind = envelope.kind();
                let result = next(envelope).await;
                if let Ok(value) = &result {
                    let size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
                    if size > threshold {
                        debug!(
                            kind,
                            size_bytes = size,
                            threshold_bytes = threshold,
                            "query result flagged for compression"
                        );
                        if let Some(sink) = &metrics {
                            sink.increment_counter(
                                "query_results_compressible_total",
                                &[("type", kind)],
                            )
                            .await;
                        }
                    }
                }
                result
            }
            .boxed()
        })
    }
}

/// Middleware that caps query limits to a configured maximum
///
/// Capping rewrites the envelope copy-on-write; the caller's envelope is
/// never mutated.
#[derive(Debug, Clone, Copy)]
pub struct PaginationMiddleware {
    max_limit: usize,
}

impl PaginationMiddleware {
    /// Create a pagination middleware with the given maximum limit
    pub fn new(max_limit: usize) -> Self {
        Self { max_limit }
    }
}

impl<Q: Query> QueryMiddleware<Q> for PaginationMiddleware {
    fn name(&self) -> &'static str {
        "pagination"
    }

    fn wrap(&self, next: QueryStage<Q>) -> QueryStage<Q> {
        let max_limit = self.max_limit;
        Arc::new(move |envelope: Arc<QueryEnvelope<Q>>| {
            let next = next.clone();
            async move {
                match envelope.criteria.limit {
                    Some(limit) if limit > max_limit => {
                        warn!(
                            kind = envelope.kind(),
                            requested = limit,
                            capped_to = max_limit,
                            "query limit capped"
                        );
                        let mut adjusted = (*envelope).clone();
                        adjusted.criteria.limit = Some(max_limit);
                        next(Arc::new(adjusted)).await
                    }
                    _ => next(envelope).await,
                }
            }
            .boxed()
        })
    }
}
