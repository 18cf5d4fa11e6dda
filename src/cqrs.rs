// Copyright 2025 Cowboy AI, LLC.

//! # CQRS (Command Query Responsibility Segregation) Pattern
//!
//! This module provides the foundational types and traits for dispatching
//! commands and queries. Commands represent write operations that modify
//! state, while queries represent read operations that retrieve data.
//!
//! Applications model their messages as closed enums: one enum of command
//! variants and one of query variants. Each variant names itself through
//! [`Command::kind`] / [`Query::kind`], and the buses dispatch on that name.
//! Envelopes compose the shared identity fields (id, timestamp, issuer,
//! correlation) around the payload by inclusion.

use crate::errors::DispatchResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use uuid::Uuid;

/// A command that requests a state change
///
/// Commands are write operations that modify state. They should be named
/// with imperative verbs (PlaceOrder, UpdateCustomer, DeleteProduct).
/// Applications define one closed enum of command variants and dispatch it
/// through a single bus.
///
/// # Examples
///
/// ```rust
/// use cim_dispatch::Command;
/// use serde::Serialize;
///
/// #[derive(Debug, Serialize)]
/// #[serde(tag = "type")]
/// enum OrderCommand {
///     PlaceOrder { customer: String },
///     CancelOrder { order_id: String },
/// }
///
/// impl Command for OrderCommand {
///     fn kind(&self) -> &'static str {
///         match self {
///             OrderCommand::PlaceOrder { .. } => "PlaceOrder",
///             OrderCommand::CancelOrder { .. } => "CancelOrder",
///         }
///     }
/// }
///
/// let cmd = OrderCommand::PlaceOrder {
///     customer: "CUST-123".to_string(),
/// };
/// assert_eq!(cmd.kind(), "PlaceOrder");
/// ```
pub trait Command: Debug + Serialize + Send + Sync + 'static {
    /// Stable name of this message variant, used as the registry key
    fn kind(&self) -> &'static str;
}

/// A query that requests data without modifying state
///
/// Queries are read operations eligible for caching. They should be named
/// to describe what they return (GetOrderById, FindCustomersByRegion).
/// Queries are plain data and must be cloneable so middleware can adjust
/// criteria copy-on-write without touching the original envelope.
pub trait Query: Debug + Serialize + Clone + Send + Sync + 'static {
    /// Stable name of this message variant, used as the registry key
    fn kind(&self) -> &'static str;
}

/// Pagination, filtering, and ordering carried by every query
///
/// Filters are kept in a sorted map so that serializing the same criteria
/// always produces the same bytes, which the query cache relies on for
/// stable keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryCriteria {
    /// Field filters to apply
    pub filters: BTreeMap<String, Value>,

    /// Maximum number of results
    pub limit: Option<usize>,

    /// Number of results to skip
    pub offset: Option<usize>,

    /// Field to order results by
    pub order_by: Option<String>,
}

impl QueryCriteria {
    /// Create empty criteria
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Set the result limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the result offset
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the ordering field
    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }
}

/// A command with identity metadata for tracking and auditing
///
/// Envelopes are immutable once constructed; the builder methods consume
/// and return the envelope before it is dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope<C> {
    /// Unique identifier for this command instance
    pub id: Uuid,
    /// When the command was issued
    pub issued_at: DateTime<Utc>,
    /// Who issued this command
    pub issued_by: Option<String>,
    /// Correlation ID propagated across the operation's lifecycle
    pub correlation_id: Option<Uuid>,
    /// The actual command
    pub command: C,
}

impl<C: Command> CommandEnvelope<C> {
    /// Create a new envelope with a fresh id and the current timestamp
    pub fn new(command: C) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            issued_by: None,
            correlation_id: None,
            command,
        }
    }

    /// Set the issuer
    pub fn with_issuer(mut self, issued_by: impl Into<String>) -> Self {
        self.issued_by = Some(issued_by.into());
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Kind of the wrapped command
    pub fn kind(&self) -> &'static str {
        self.command.kind()
    }
}

/// A query with identity metadata and criteria
#[derive(Debug, Clone, Serialize)]
pub struct QueryEnvelope<Q> {
    /// Unique identifier for this query instance
    pub id: Uuid,
    /// When the query was issued
    pub issued_at: DateTime<Utc>,
    /// Who issued this query
    pub issued_by: Option<String>,
    /// Correlation ID propagated across the operation's lifecycle
    pub correlation_id: Option<Uuid>,
    /// Pagination, filtering, and ordering
    pub criteria: QueryCriteria,
    /// The actual query
    pub query: Q,
}

impl<Q: Query> QueryEnvelope<Q> {
    /// Create a new envelope with a fresh id and the current timestamp
    pub fn new(query: Q) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            issued_by: None,
            correlation_id: None,
            criteria: QueryCriteria::default(),
            query,
        }
    }

    /// Set the criteria
    pub fn with_criteria(mut self, criteria: QueryCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Set the issuer
    pub fn with_issuer(mut self, issued_by: impl Into<String>) -> Self {
        self.issued_by = Some(issued_by.into());
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Kind of the wrapped query
    pub fn kind(&self) -> &'static str {
        self.query.kind()
    }
}

/// Handler for one command kind
///
/// Exactly one handler serves each command kind. The bus runs `validate`
/// then `handle`; `handle` executes once per dispatch unless the retry
/// middleware re-invokes it.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Kind of command this handler serves
    fn handled_kind(&self) -> &'static str;

    /// Check payload constraints before handling
    async fn validate(&self, _envelope: &CommandEnvelope<C>) -> DispatchResult<()> {
        Ok(())
    }

    /// Execute the command and return its result
    async fn handle(&self, envelope: &CommandEnvelope<C>) -> DispatchResult<Value>;
}

/// Handler for one query kind
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// Kind of query this handler serves
    fn handled_kind(&self) -> &'static str;

    /// Check payload constraints before handling
    async fn validate(&self, _envelope: &QueryEnvelope<Q>) -> DispatchResult<()> {
        Ok(())
    }

    /// Execute the query and return its result
    async fn handle(&self, envelope: &QueryEnvelope<Q>) -> DispatchResult<Value>;
}
