//! In-memory implementation of the Cache trait for single-node deployments
//! and tests.

use crate::{Cache, CacheResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Cache implementation backed by a sharded concurrent map.
///
/// Expired entries are dropped lazily on access; there is no background
/// sweeper. TTLs are measured with `tokio::time::Instant` so tests running
/// under a paused runtime clock can advance time deterministically.
///
/// # Example
/// ```rust
/// use cache_kit::{Cache, InMemoryCache};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = InMemoryCache::new();
/// cache.set("partner:code:acme", "42", Some(Duration::from_secs(3600))).await?;
/// assert_eq!(cache.get("partner:code:acme").await?.as_deref(), Some("42"));
///
/// // Atomic insert-if-absent: only the first writer wins.
/// assert!(cache.set_nx("request_id:abc", "processed", None).await?);
/// assert!(!cache.set_nx("request_id:abc", "processed", None).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryCache {
    entries: std::sync::Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Intended for tests and
    /// diagnostics.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// True if the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_entry(value: &str, ttl: Option<Duration>) -> CacheEntry {
        CacheEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        // Drop the expired entry so the map does not grow unboundedly.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), Self::make_entry(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        let now = Instant::now();

        // The entry API holds the shard lock across the check and insert,
        // so concurrent callers cannot both observe "absent".
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Self::make_entry(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Self::make_entry(value, ttl));
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", None).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let cache = InMemoryCache::new();
        cache.set("k", "first", None).await.unwrap();
        cache.set("k", "second", None).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_secs(600)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_inserts_only_when_absent() {
        let cache = InMemoryCache::new();

        assert!(cache.set_nx("k", "first", None).await.unwrap());
        assert!(!cache.set_nx("k", "second", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_reclaims_expired_entry() {
        let cache = InMemoryCache::new();

        assert!(cache
            .set_nx("k", "first", Some(Duration::from_secs(10)))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.set_nx("k", "second", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        cache.remove("k").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_set_nx_has_single_winner() {
        let cache = InMemoryCache::new();
        let mut handles = Vec::new();

        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .set_nx("request_id:dup", &format!("writer-{i}"), None)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
