//! # Cache Abstraction
//!
//! A platform-level key-value cache with per-entry TTL, used by the request
//! verification path (replay markers, partner lookups) and the query side
//! (statistics snapshots).
//!
//! ## Implementations
//!
//! - **InMemoryCache**: process-local sharded map. Suitable for single-node
//!   deployments, local development, and tests. A distributed backend (e.g.
//!   Redis) slots in behind the same trait.
//!
//! `set_nx` is the load-bearing operation: it inserts a key only if it is
//! absent, atomically, which is what makes replay-marker reservation safe
//! under concurrent duplicate submissions.

mod inmemory_cache;

pub use inmemory_cache::InMemoryCache;

use async_trait::async_trait;
use std::time::Duration;

/// Errors that can occur when talking to the cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value cache with optional per-entry TTL.
///
/// Values are strings; callers serialize anything richer themselves.
/// Implementations must be safe for fully concurrent use — the verification
/// path relies on the backend's own concurrency guarantees and takes no
/// locks of its own.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// `ttl = None` means the entry does not expire.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Store `value` under `key` only if the key is absent (or expired).
    ///
    /// Returns `true` if this call inserted the entry, `false` if a live
    /// entry already existed. The check and insert are atomic.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Remove the entry for `key`, if any.
    async fn remove(&self, key: &str) -> CacheResult<()>;
}
