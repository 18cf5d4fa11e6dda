// Copyright 2025 Cowboy AI, LLC.

//! Query result caching
//!
//! The query bus consults a [`QueryCache`] before running any pipeline. The
//! default implementation is an in-process bounded LRU with lazy TTL expiry;
//! deployments needing cross-instance coherence can inject their own
//! implementation instead.

use crate::cqrs::QueryCriteria;
use crate::errors::DispatchResult;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the in-process query cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether query results are cached at all
    pub enabled: bool,

    /// Maximum number of cached entries before LRU eviction
    pub max_entries: usize,

    /// How long a cached value stays fresh
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Cache for query results
///
/// Keys are computed with [`cache_key`] from the query kind, payload, and
/// criteria; envelope identity never participates, so repeated dispatches of
/// the same query map to the same entry.
#[async_trait]
pub trait QueryCache: Send + Sync + fmt::Debug {
    /// Get a fresh value for a key, if present
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value under a key
    async fn put(&self, key: String, value: Value);

    /// Drop every entry
    async fn clear(&self);

    /// Number of entries currently held
    async fn len(&self) -> usize;

    /// Whether the cache holds no entries
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// Bounded in-process LRU cache with per-entry TTL
///
/// Capacity eviction is O(1) through the `lru` crate; expired entries are
/// dropped lazily when looked up.
pub struct LruTtlCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl fmt::Debug for LruTtlCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruTtlCache").field("ttl", &self.ttl).finish()
    }
}

impl LruTtlCache {
    /// Create a cache holding at most `max_entries` values
    ///
    /// A zero capacity is clamped to one entry.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Create a cache from a [`CacheConfig`]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }
}

#[async_trait]
impl QueryCache for LruTtlCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().ok()?;

        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(key, "expired cache entry dropped");
        }
        None
    }

    async fn put(&self, key: String, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            let evicted = entries.push(
                key.clone(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
            if let Some((evicted_key, _)) = evicted {
                if evicted_key != key {
                    debug!(key = %evicted_key, "cache entry evicted");
                }
            }
        }
    }

    async fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    async fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

/// Compute the cache key for a query
///
/// SHA-256 over the query kind, its serialized payload, and its criteria.
/// The payload comes from the query value itself, so envelope identity
/// fields (id, timestamp, correlation) never influence the key.
pub fn cache_key(kind: &str, payload: &Value, criteria: &QueryCriteria) -> DispatchResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(payload)?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(criteria)?);
    Ok(format!("{:x}", hasher.finalize()))
}
