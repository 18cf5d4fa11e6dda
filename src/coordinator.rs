// Copyright 2025 Cowboy AI, LLC.

//! CQRS coordinator
//!
//! Owns the lifecycle of a command bus, a query bus, and an optional event
//! store. Dependencies are passed in explicitly; the coordinator wires the
//! store into the command bus, installs the standard middleware once, and
//! gates dispatch until `initialize` has run. Health and statistics views
//! aggregate across all three components.

use crate::cache::CacheConfig;
use crate::command_bus::{CommandBus, CommandBusStats};
use crate::cqrs::{Command, CommandEnvelope, Query, QueryEnvelope};
use crate::errors::{DispatchError, DispatchResult};
use crate::infrastructure::{EventStore, EventStoreStats};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::middleware::{
    CompressionMiddleware, PaginationMiddleware, RetryMiddleware, RetryPolicy, TimingMiddleware,
    ValidationMiddleware,
};
use crate::query_bus::{QueryBus, QueryBusConfig, QueryBusStats, DEFAULT_QUERY_TIMEOUT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for the coordinator and the middleware it installs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Whether command dispatch writes audit events to the store
    pub event_sourcing_enabled: bool,

    /// Retry policy installed on the command bus
    pub retry: RetryPolicy,

    /// Time budget per query dispatch
    pub query_timeout: Duration,

    /// Query result cache settings
    pub cache: CacheConfig,

    /// Maximum query limit enforced by pagination middleware
    pub pagination_max_limit: usize,

    /// Result size above which compression is flagged, in bytes
    pub compression_threshold_bytes: usize,

    /// When set, shutdown archives events older than this many days
    pub archive_after_days: Option<u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_sourcing_enabled: true,
            retry: RetryPolicy::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            cache: CacheConfig::default(),
            pagination_max_limit: 100,
            compression_threshold_bytes: 1024,
            archive_after_days: None,
        }
    }
}

/// Overall health of the dispatch system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Initialized and all probes passing
    Ready,

    /// Initialized but the event store probe failed
    Degraded,

    /// Not initialized
    Unhealthy,
}

/// Health probe result with supporting detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,

    /// Human-readable explanation when not ready
    pub detail: Option<String>,

    /// Event store statistics when the probe succeeded
    pub event_store: Option<EventStoreStats>,
}

/// Aggregated statistics from both buses and the event store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Command bus counters
    pub commands: CommandBusStats,

    /// Query bus counters
    pub queries: QueryBusStats,

    /// Event store statistics, when a store is attached
    pub event_store: Option<EventStoreStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Uninitialized,
    Ready,
}

/// Lifecycle owner for the dispatch system
pub struct CqrsCoordinator<C: Command, Q: Query> {
    config: CoordinatorConfig,
    command_bus: Arc<CommandBus<C>>,
    query_bus: Arc<QueryBus<Q>>,
    event_store: Option<Arc<dyn EventStore>>,
    metrics: Arc<dyn MetricsSink>,
    state: RwLock<CoordinatorState>,
    defaults_installed: AtomicBool,
}

impl<C: Command, Q: Query> CqrsCoordinator<C, Q> {
    /// Create a coordinator over explicitly provided components
    pub fn new(
        config: CoordinatorConfig,
        command_bus: Arc<CommandBus<C>>,
        query_bus: Arc<QueryBus<Q>>,
        event_store: Option<Arc<dyn EventStore>>,
    ) -> Self {
        Self {
            config,
            command_bus,
            query_bus,
            event_store,
            metrics: Arc::new(NoopMetricsSink),
            state: RwLock::new(CoordinatorState::Uninitialized),
            defaults_installed: AtomicBool::new(false),
        }
    }

    /// Create a coordinator that builds its own buses from the config
    ///
    /// No event store is attached; use [`CqrsCoordinator::new`] to wire one.
    pub fn from_config(config: CoordinatorConfig) -> Self {
        let query_config = QueryBusConfig {
            cache: config.cache.clone(),
            timeout: config.query_timeout,
        };
        Self::new(
            config,
            Arc::new(CommandBus::new()),
            Arc::new(QueryBus::with_config(query_config)),
            None,
        )
    }

    /// Attach a metrics sink used by coordinator-installed middleware
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Transition to ready: prepare the store, wire it into the command
    /// bus, and install the standard middleware
    ///
    /// Calling this on an initialized coordinator is a logged no-op. The
    /// standard middleware is installed at most once across the whole
    /// lifetime, so shutdown followed by initialize does not stack
    /// duplicates.
    pub async fn initialize(&self) -> DispatchResult<()> {
        let mut state = self.state.write().await;
        if *state == CoordinatorState::Ready {
            debug!("coordinator already initialized");
            return Ok(());
        }

        if let Some(store) = &self.event_store {
            if self.config.event_sourcing_enabled {
                store.initialize().await?;
                self.command_bus.set_event_store(store.clone()).await;
            }
        }

        if !self.defaults_installed.swap(true, Ordering::SeqCst) {
            self.command_bus
                .add_middleware(Arc::new(ValidationMiddleware))
                .await;
            self.command_bus
                .add_middleware(Arc::new(TimingMiddleware))
                .await;
            self.command_bus
                .add_middleware(Arc::new(RetryMiddleware::new(self.config.retry.clone())))
                .await;

            self.query_bus
                .add_middleware(Arc::new(
                    CompressionMiddleware::new(self.config.compression_threshold_bytes)
                        .with_metrics(self.metrics.clone()),
                ))
                .await;
            self.query_bus
                .add_middleware(Arc::new(PaginationMiddleware::new(
                    self.config.pagination_max_limit,
                )))
                .await;
        }

        *state = CoordinatorState::Ready;
        info!("CQRS coordinator initialized");
        Ok(())
    }

    /// Transition back to uninitialized, clearing caches and optionally
    /// archiving old events
    ///
    /// Calling this on an uninitialized coordinator is a logged no-op.
    pub async fn shutdown(&self) -> DispatchResult<()> {
        let mut state = self.state.write().await;
        if *state == CoordinatorState::Uninitialized {
            debug!("coordinator already shut down");
            return Ok(());
        }

        self.query_bus.clear_cache().await;

        if let Some(days) = self.config.archive_after_days {
            if let Some(store) = &self.event_store {
                match store.archive_old_events(days).await {
                    Ok(archived) => info!(archived, "events archived during shutdown"),
                    Err(error) => warn!(%error, "archival during shutdown failed"),
                }
            }
        }

        *state = CoordinatorState::Uninitialized;
        info!("CQRS coordinator shut down");
        Ok(())
    }

    /// Whether the coordinator is ready to dispatch
    pub async fn is_initialized(&self) -> bool {
        *self.state.read().await == CoordinatorState::Ready
    }

    async fn ensure_ready(&self) -> DispatchResult<()> {
        if *self.state.read().await == CoordinatorState::Ready {
            Ok(())
        } else {
            Err(DispatchError::NotInitialized)
        }
    }

    /// The command bus, once initialized
    pub async fn command_bus(&self) -> DispatchResult<Arc<CommandBus<C>>> {
        self.ensure_ready().await?;
        Ok(self.command_bus.clone())
    }

    /// The query bus, once initialized
    pub async fn query_bus(&self) -> DispatchResult<Arc<QueryBus<Q>>> {
        self.ensure_ready().await?;
        Ok(self.query_bus.clone())
    }

    /// The event store, if one was attached
    pub fn event_store(&self) -> Option<Arc<dyn EventStore>> {
        self.event_store.clone()
    }

    /// Dispatch a command through the command bus
    pub async fn execute_command(&self, envelope: CommandEnvelope<C>) -> DispatchResult<Value> {
        self.ensure_ready().await?;
        self.command_bus.execute(envelope).await
    }

    /// Dispatch a query through the query bus
    pub async fn execute_query(&self, envelope: QueryEnvelope<Q>) -> DispatchResult<Value> {
        self.ensure_ready().await?;
        self.query_bus.execute(envelope).await
    }

    /// Probe overall health
    ///
    /// Uninitialized coordinators are unhealthy. An initialized coordinator
    /// is degraded when the event store statistics probe fails, ready
    /// otherwise.
    pub async fn health_status(&self) -> HealthReport {
        if *self.state.read().await != CoordinatorState::Ready {
            return HealthReport {
                status: HealthStatus::Unhealthy,
                detail: Some("coordinator is not initialized".to_string()),
                event_store: None,
            };
        }

        match &self.event_store {
            None => HealthReport {
                status: HealthStatus::Ready,
                detail: None,
                event_store: None,
            },
            Some(store) => match store.get_statistics().await {
                Ok(stats) => HealthReport {
                    status: HealthStatus::Ready,
                    detail: None,
                    event_store: Some(stats),
                },
                Err(error) => {
                    warn!(%error, "event store health probe failed");
                    HealthReport {
                        status: HealthStatus::Degraded,
                        detail: Some(format!("event store probe failed: {error}")),
                        event_store: None,
                    }
                }
            },
        }
    }

    /// Aggregated statistics from both buses and the event store
    pub async fn stats(&self) -> DispatchResult<CoordinatorStats> {
        self.ensure_ready().await?;

        let event_store = match &self.event_store {
            Some(store) => Some(store.get_statistics().await?),
            None => None,
        };

        Ok(CoordinatorStats {
            commands: self.command_bus.stats().await,
            queries: self.query_bus.stats().await,
            event_store,
        })
    }
}

impl<C: Command, Q: Query> std::fmt::Debug for CqrsCoordinator<C, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqrsCoordinator")
            .field("config", &self.config)
            .field("has_event_store", &self.event_store.is_some())
            .finish()
    }
}
