// Copyright 2025 Cowboy AI, LLC.

//! Command bus: registration, middleware, and audited dispatch
//!
//! The bus owns a registry of command handlers keyed by command kind, an
//! ordered middleware list, and optionally an event store used to record
//! an audit trail of every dispatch. Audit writes are best-effort: a
//! failing store never changes the outcome returned to the caller.

use crate::cqrs::{Command, CommandEnvelope, CommandHandler};
use crate::errors::{DispatchError, DispatchResult};
use crate::infrastructure::{EventStore, StoredEvent};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::middleware::{build_command_pipeline, CommandMiddleware};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Snapshot of command bus counters and registry state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBusStats {
    /// Commands that completed successfully
    pub executed: u64,

    /// Commands that returned an error
    pub failed: u64,

    /// executed / (executed + failed); 1.0 when nothing has run
    pub success_rate: f64,

    /// Mean wall-clock latency across all dispatches, in milliseconds
    pub avg_latency_ms: f64,

    /// Command kinds with a registered handler, in registration order
    pub registered_types: Vec<String>,

    /// Number of middleware installed
    pub middleware_count: usize,
}

/// Dispatches command envelopes through middleware to registered handlers
pub struct CommandBus<C: Command> {
    handlers: RwLock<IndexMap<&'static str, Arc<dyn CommandHandler<C>>>>,
    middleware: RwLock<Vec<Arc<dyn CommandMiddleware<C>>>>,
    event_store: RwLock<Option<Arc<dyn EventStore>>>,
    metrics: Arc<dyn MetricsSink>,
    executed: AtomicU64,
    failed: AtomicU64,
    latency_micros: AtomicU64,
}

impl<C: Command> Default for CommandBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> CommandBus<C> {
    /// Create a bus with no handlers, no middleware, and no-op metrics
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(NoopMetricsSink))
    }

    /// Create a bus that reports to the given metrics sink
    pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            handlers: RwLock::new(IndexMap::new()),
            middleware: RwLock::new(Vec::new()),
            event_store: RwLock::new(None),
            metrics,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }

    /// Attach the event store used for the audit trail
    pub async fn set_event_store(&self, store: Arc<dyn EventStore>) {
        *self.event_store.write().await = Some(store);
    }

    /// Register a handler under the kind it declares
    ///
    /// Re-registering a kind replaces the previous handler with a warning;
    /// last registration wins.
    pub async fn register(&self, handler: Arc<dyn CommandHandler<C>>) {
        let kind = handler.handled_kind();
        let previous = self.handlers.write().await.insert(kind, handler);
        if previous.is_some() {
            warn!(kind, "command handler replaced");
        } else {
            debug!(kind, "command handler registered");
        }
    }

    /// Append a middleware to the pipeline
    ///
    /// Middleware run in the order they were added, first added outermost.
    pub async fn add_middleware(&self, middleware: Arc<dyn CommandMiddleware<C>>) {
        info!(middleware = middleware.name(), "command middleware added");
        self.middleware.write().await.push(middleware);
    }

    /// Whether a handler is registered for `kind`
    pub async fn is_registered(&self, kind: &str) -> bool {
        self.handlers.read().await.contains_key(kind)
    }

    /// Execute one command through the full middleware pipeline
    ///
    /// Missing handlers fail before any middleware, counter, or audit work
    /// happens. Once a handler is resolved, every outcome updates counters,
    /// emits metrics, and records an audit event when an event store is
    /// attached.
    pub async fn execute(&self, envelope: CommandEnvelope<C>) -> DispatchResult<Value> {
        let kind = envelope.kind();
        let handler = { self.handlers.read().await.get(kind).cloned() };
        let handler = handler.ok_or_else(|| DispatchError::NoHandler {
            kind: kind.to_string(),
        })?;
        let middleware = { self.middleware.read().await.clone() };

        let pipeline = build_command_pipeline(handler, &middleware);
        let envelope = Arc::new(envelope);

        let started = Instant::now();
        let result = pipeline(envelope.clone()).await;
        let elapsed = started.elapsed();
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        match &result {
            Ok(_) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment_counter(
                        "commands_executed_total",
                        &[("type", kind), ("status", "success")],
                    )
                    .await;
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment_counter(
                        "commands_failed_total",
                        &[("type", kind), ("status", error.status_label())],
                    )
                    .await;
            }
        }
        self.metrics
            .record_histogram(
                "command_duration_seconds",
                elapsed.as_secs_f64(),
                &[("type", kind)],
            )
            .await;

        self.record_audit_event(&envelope, result.as_ref().err()).await;
        result
    }

    /// Execute a batch of commands, in parallel or in order
    ///
    /// Each command succeeds or fails on its own; one failure never stops
    /// the rest. Results are returned in input order.
    pub async fn execute_batch(
        &self,
        envelopes: Vec<CommandEnvelope<C>>,
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

    /// Current counters and registry state
    pub async fn stats(&self) -> CommandBusStats {
        let executed = self.executed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = executed + failed;
        let success_rate = if total == 0 {
            1.0
        } else {
            executed as f64 / total as f64
        };
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            self.latency_micros.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
        };

        CommandBusStats {
            executed,
            failed,
            success_rate,
            avg_latency_ms,
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

    /// Record the dispatch outcome in the event store, best-effort
    async fn record_audit_event(&self, envelope: &CommandEnvelope<C>, error: Option<&DispatchError>) {
        let store = { self.event_store.read().await.clone() };
        let Some(store) = store else { return };

        let (event_type, data) = match error {
            None => (
                "COMMAND_EXECUTED",
                json!({ "command_type": envelope.kind() }),
            ),
            Some(error) => (
                "COMMAND_FAILED",
                json!({ "command_type": envelope.kind(), "error": error.to_string() }),
            ),
        };

        let mut event = StoredEvent::new(event_type, envelope.id.to_string(), 1, data);
        event.correlation_id = envelope.correlation_id;
        event.user_id = envelope.issued_by.clone();

        if let Err(store_error) = store.store_event(event).await {
            warn!(
                command = envelope.kind(),
                %store_error,
                "failed to record audit event"
            );
        }
    }
}

impl<C: Command> std::fmt::Debug for CommandBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("executed", &self.executed.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    enum InventoryCommand {
        AddItem { sku: String, quantity: u32 },
        RemoveItem { sku: String },
    }

    impl Command for InventoryCommand {
        fn kind(&self) -> &'static str {
            match self {
                InventoryCommand::AddItem { .. } => "AddItem",
                InventoryCommand::RemoveItem { .. } => "RemoveItem",
            }
        }
    }

    #[derive(Debug)]
    struct AddItemHandler {
        reply: Value,
    }

    #[async_trait]
    impl CommandHandler<InventoryCommand> for AddItemHandler {
        fn handled_kind(&self) -> &'static str {
            "AddItem"
        }

        async fn validate(
            &self,
            envelope: &CommandEnvelope<InventoryCommand>,
        ) -> DispatchResult<()> {
            if let InventoryCommand::AddItem { quantity, .. } = &envelope.command {
                if *quantity == 0 {
                    return Err(DispatchError::validation("quantity must be positive"));
                }
            }
            Ok(())
        }

        async fn handle(
            &self,
            _envelope: &CommandEnvelope<InventoryCommand>,
        ) -> DispatchResult<Value> {
            Ok(self.reply.clone())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl CommandHandler<InventoryCommand> for FailingHandler {
        fn handled_kind(&self) -> &'static str {
            "RemoveItem"
        }

        async fn handle(
            &self,
            _envelope: &CommandEnvelope<InventoryCommand>,
        ) -> DispatchResult<Value> {
            Err(DispatchError::handler("RemoveItem", "item is locked"))
        }
    }

    fn add_item(sku: &str, quantity: u32) -> CommandEnvelope<InventoryCommand> {
        CommandEnvelope::new(InventoryCommand::AddItem {
            sku: sku.to_string(),
            quantity,
        })
    }

    #[tokio::test]
    async fn test_execute_routes_to_registered_handler() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler {
            reply: json!({"accepted": true}),
        }))
        .await;

        let result = bus.execute(add_item("widget", 3)).await.unwrap();
        assert_eq!(result, json!({"accepted": true}));
    }

    #[tokio::test]
    async fn test_execute_without_handler_fails() {
        let bus: CommandBus<InventoryCommand> = CommandBus::new();
        let error = bus.execute(add_item("widget", 3)).await.unwrap_err();
        assert!(error.is_no_handler());
        assert_eq!(
            error.to_string(),
            "No handler registered for message kind: AddItem"
        );
    }

    /// Re-registering a kind replaces the previous handler
    #[tokio::test]
    async fn test_last_registration_wins() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler { reply: json!(1) }))
            .await;
        bus.register(Arc::new(AddItemHandler { reply: json!(2) }))
            .await;

        let result = bus.execute(add_item("widget", 1)).await.unwrap();
        assert_eq!(result, json!(2));

        let stats = bus.stats().await;
        assert_eq!(stats.registered_types, vec!["AddItem".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_validate_runs_before_handle() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler { reply: json!(null) }))
            .await;

        let error = bus.execute(add_item("widget", 0)).await.unwrap_err();
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn test_stats_track_successes_and_failures() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler { reply: json!(null) }))
            .await;
        bus.register(Arc::new(FailingHandler)).await;

        bus.execute(add_item("a", 1)).await.unwrap();
        bus.execute(add_item("b", 1)).await.unwrap();
        bus.execute(CommandEnvelope::new(InventoryCommand::RemoveItem {
            sku: "a".to_string(),
        }))
        .await
        .unwrap_err();

        let stats = bus.stats().await;
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.registered_types.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_bus_stats() {
        let bus: CommandBus<InventoryCommand> = CommandBus::new();
        let stats = bus.stats().await;
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.avg_latency_ms, 0.0);
    }

    /// One failing command in a batch must not affect its siblings
    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler { reply: json!("ok") }))
            .await;
        bus.register(Arc::new(FailingHandler)).await;

        let batch = vec![
            add_item("a", 1),
            CommandEnvelope::new(InventoryCommand::RemoveItem {
                sku: "a".to_string(),
            }),
            add_item("b", 2),
        ];

        let results = bus.execute_batch(batch, false).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_batch_parallel_returns_input_order() {
        let bus = CommandBus::new();
        bus.register(Arc::new(AddItemHandler { reply: json!("ok") }))
            .await;

        let batch: Vec<_> = (0..8).map(|i| add_item(&format!("sku-{i}"), 1)).collect();
        let results = bus.execute_batch(batch, true).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(bus.stats().await.executed, 8);
    }

    #[tokio::test]
    async fn test_metrics_sink_receives_counters() {
        let sink = Arc::new(crate::metrics::InMemoryMetricsSink::new());
        let bus = CommandBus::with_metrics(sink.clone());
        bus.register(Arc::new(AddItemHandler { reply: json!(null) }))
            .await;
        bus.register(Arc::new(FailingHandler)).await;

        bus.execute(add_item("a", 1)).await.unwrap();
        bus.execute(CommandEnvelope::new(InventoryCommand::RemoveItem {
            sku: "a".to_string(),
        }))
        .await
        .unwrap_err();

        assert_eq!(
            sink.get_counter(
                "commands_executed_total",
                &[("type", "AddItem"), ("status", "success")]
            )
            .await,
            1
        );
        assert_eq!(
            sink.get_counter(
                "commands_failed_total",
                &[("type", "RemoveItem"), ("status", "error")]
            )
            .await,
            1
        );
    }
}
