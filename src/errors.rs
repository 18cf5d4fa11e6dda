// Copyright 2025 Cowboy AI, LLC.

//! Error types for dispatch operations

use crate::infrastructure::EventStoreError;
use thiserror::Error;

/// Errors that can occur while dispatching commands and queries
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Message failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No handler is registered for the message kind
    #[error("No handler registered for message kind: {kind}")]
    NoHandler {
        /// Kind of the message that could not be dispatched
        kind: String,
    },

    /// Handler failed while executing the message
    #[error("Handler error for {kind}: {message}")]
    Handler {
        /// Kind of the message being handled
        kind: String,
        /// Error message reported by the handler
        message: String,
    },

    /// Query pipeline exceeded the bus timeout
    #[error("Query {kind} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Kind of the query that timed out
        kind: String,
        /// Milliseconds elapsed before the timeout fired
        elapsed_ms: u64,
    },

    /// Event store operation failed
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// Dispatch was attempted before the coordinator was initialized
    #[error("CQRS coordinator is not initialized")]
    NotInitialized,

    /// Failed to serialize or deserialize a payload or result
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

impl DispatchError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        DispatchError::Validation(msg.into())
    }

    /// Create a handler error for a message kind
    pub fn handler(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        DispatchError::Handler {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, DispatchError::Validation(_))
    }

    /// Check if this error may be retried
    ///
    /// Only handler failures are retryable; validation errors, missing
    /// handlers, and timeouts never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Handler { .. })
    }

    /// Check if this is a query timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }

    /// Check if this is a missing-handler error
    pub fn is_no_handler(&self) -> bool {
        matches!(self, DispatchError::NoHandler { .. })
    }

    /// Metric status label for this error
    pub(crate) fn status_label(&self) -> &'static str {
        match self {
            DispatchError::Timeout { .. } => "timeout",
            _ => "error",
        }
    }
}
