// Copyright 2025 Cowboy AI, LLC.

//! Query bus: cached, middleware-wrapped dispatch with timeouts
//!
//! Queries flow cache-first. A fresh cached result is returned without
//! resolving a handler or running middleware; only a miss pays for the
//! full pipeline, which runs under a timeout. Results are cached under a
//! key derived from the query kind, payload, and criteria, never from
//! envelope identity, so two envelopes carrying the same question share
//! one cache entry.

use crate::cache::{cache_key, CacheConfig, LruTtlCache, QueryCache};
use crate::cqrs::{Query, QueryEnvelope, QueryHandler};
use crate::errors::{DispatchError, DispatchResult};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::middleware::{build_query_pipeline, QueryMiddleware};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default time budget for a single query dispatch
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a query bus
#[derive(Debug, Clone)]
pub struct QueryBusConfig {
    /// Result cache settings
    pub cache: CacheConfig,

    /// Per-dispatch time budget
    pub timeout: Duration,
}

impl Default for QueryBusConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Snapshot of query bus counters, cache state, and registry state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBusStats {
    /// Queries answered, from cache or from a handler
    pub executed: u64,

    /// Queries answered from cache
    pub cache_hits: u64,

    /// Cache lookups that missed and went to a handler
    pub cache_misses: u64,

    /// cache_hits / executed; 0.0 when nothing has run
    pub hit_rate: f64,

    /// Mean wall-clock latency across all dispatches, in milliseconds
    pub avg_latency_ms: f64,

    /// Entries currently held by the cache
    pub cache_size: usize,

    /// Query kinds with a registered handler, in registration order
    pub registered_types: Vec<String>,

    /// Number of middleware installed
    pub middleware_count: usize,
}

/// Dispatches query envelopes through a cache and middleware to handlers
pub struct QueryBus<Q: Query> {
    handlers: RwLock<IndexMap<&'static str, Arc<dyn QueryHandler<Q>>>>,
    middleware: RwLock<Vec<Arc<dyn QueryMiddleware<Q>>>>,
    cache: Arc<dyn QueryCache>,
    cache_enabled: bool,
    timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
    executed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latency_micros: AtomicU64,
}

impl<Q: Query> Default for QueryBus<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: Query> QueryBus<Q> {
    /// Create a bus with default cache, timeout, and no-op metrics
    pub fn new() -> Self {
        Self::with_config(QueryBusConfig::default())
    }

    /// Create a bus with the given configuration and its own LRU cache
    pub fn with_config(config: QueryBusConfig) -> Self {
        let cache = Arc::new(LruTtlCache::from_config(&config.cache));
        Self::with_cache(cache, config, Arc::new(NoopMetricsSink))
    }

    /// Create a bus around an externally supplied cache and metrics sink
    pub fn with_cache(
        cache: Arc<dyn QueryCache>,
        config: QueryBusConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            handlers: RwLock::new(IndexMap::new()),
            middleware: RwLock::new(Vec::new()),
            cache,
            cache_enabled: config.cache.enabled,
            timeout: config.timeout,
            metrics,
            executed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }

    /// Register a handler under the kind it declares
    ///
    /// Last registration wins, with a warning on replacement.
    pub async fn register(&self, handler: Arc<dyn QueryHandler<Q>>) {
        let kind = handler.handled_kind();
        let previous = self.handlers.write().await.insert(kind, handler);
        if previous.is_some() {
            warn!(kind, "query handler replaced");
        } else {
            debug!(kind, "query handler registered");
        }
    }

    /// Append a middleware to the pipeline
    pub async fn add_middleware(&self, middleware: Arc<dyn QueryMiddleware<Q>>) {
        info!(middleware = middleware.name(), "query middleware added");
        self.middleware.write().await.push(middleware);
    }

    /// Whether a handler is registered for `kind`
    pub async fn is_registered(&self, kind: &str) -> bool {
        self.handlers.read().await.contains_key(kind)
    }

    /// Execute one query using the bus-wide caching default
    pub async fn execute(&self, envelope: QueryEnvelope<Q>) -> DispatchResult<Value> {
        self.dispatch(envelope, None).await
    }

    /// Execute one query with an explicit per-call caching decision
    pub async fn execute_with_cache(
        &self,
        envelope: QueryEnvelope<Q>,
        use_cache: bool,
    ) -> DispatchResult<Value> {
        self.dispatch(envelope, Some(use_cache)).await
    }

    async fn dispatch(
        &self,
        envelope: QueryEnvelope<Q>,
        use_cache: Option<bool>,
    ) -> DispatchResult<Value> {
        let kind = envelope.kind();
        let caching = use_cache.unwrap_or(self.cache_enabled);
        let started = Instant::now();

        let key = if caching {
            self.derive_key(&envelope)
        } else {
            None
        };

        if let Some(key) = &key {
            if let Some(value) = self.cache.get(key).await {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.executed.fetch_add(1, Ordering::Relaxed);
                self.latency_micros
                    .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                self.metrics
                    .increment_counter("query_cache_hits_total", &[("type", kind)])
                    .await;
                debug!(kind, "query served from cache");
                return Ok(value);
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .increment_counter("query_cache_misses_total", &[("type", kind)])
                .await;
        }

        let handler = { self.handlers.read().await.get(kind).cloned() };
        let handler = handler.ok_or_else(|| DispatchError::NoHandler {
            kind: kind.to_string(),
        })?;
        let middleware = { self.middleware.read().await.clone() };

        let pipeline = build_query_pipeline(handler, &middleware);
        let envelope = Arc::new(envelope);

        let result = match tokio::time::timeout(self.timeout, pipeline(envelope.clone())).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                kind: kind.to_string(),
                elapsed_ms: self.timeout.as_millis() as u64,
            }),
        };

        let elapsed = started.elapsed();
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        match &result {
            Ok(value) => {
                self.metrics
                    .increment_counter(
                        "queries_executed_total",
                        &[("type", kind), ("status", "success")],
                    )
                    .await;
                if let Some(key) = key {
                    self.cache.put(key, value.clone()).await;
                }
            }
            Err(error) => {
                self.metrics
                    .increment_counter(
                        "queries_executed_total",
                        &[("type", kind), ("status", error.status_label())],
                    )
                    .await;
            }
        }
        self.metrics
            .record_histogram(
                "query_duration_seconds",
                elapsed.as_secs_f64(),
                &[("type", kind)],
            )
            .await;

        result
    }

    /// Execute a batch of queries, in parallel or in order
    ///
    /// Batches are usually dispatched in parallel; each query succeeds or
    /// fails on its own and results come back in input order.
    pub async fn execute_batch(
        &self,
        envelopes: Vec<QueryEnvelope<Q>>,
        parallel: bool,
    ) -> Vec<DispatchResult<Value>> {
        if parallel {
            join_all(envelopes.into_iter().map(|envelope| self.execute(envelope))).await
        } else {
            let mut results = Vec::with_capacity(envelopes.len());
            for envelope in envelopes {
                results.push(self.execute(envelope).await);
            }
            results
        }
    }

    /// Drop every cached result
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("query cache cleared");
    }

    /// Current counters, cache state, and registry state
    pub async fn stats(&self) -> QueryBusStats {
        let executed = self.executed.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let hit_rate = if executed == 0 {
            0.0
        } else {
            cache_hits as f64 / executed as f64
        };
        let avg_latency_ms = if executed == 0 {
            0.0
        } else {
            self.latency_micros.load(Ordering::Relaxed) as f64 / executed as f64 / 1000.0
        };

        QueryBusStats {
            executed,
            cache_hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            hit_rate,
            avg_latency_ms,
            cache_size: self.cache.len().await,
            registered_types: self
                .handlers
                .read()
                .await
                .keys()
                .map(|k| k.to_string())
                .collect(),
            middleware_count: self.middleware.read().await.len(),
        }
    }

    /// Cache key for the envelope, or None when it cannot be derived
    fn derive_key(&self, envelope: &QueryEnvelope<Q>) -> Option<String> {
        let payload = match serde_json::to_value(&envelope.query) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(kind = envelope.kind(), %error, "query payload not serializable, skipping cache");
                return None;
            }
        };
        match cache_key(envelope.kind(), &payload, &envelope.criteria) {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(kind = envelope.kind(), %error, "failed to derive cache key");
                None
            }
        }
    }
}

impl<Q: Query> std::fmt::Debug for QueryBus<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBus")
            .field("executed", &self.executed.load(Ordering::Relaxed))
            .field("cache_hits", &self.cache_hits.load(Ordering::Relaxed))
            .field("timeout", &self.timeout)
            .finish()
    }
}
