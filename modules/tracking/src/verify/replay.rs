//! Replay protection: time-boxed "seen request id" markers in the cache.

use cache_kit::{Cache, CacheError};
use std::sync::Arc;
use std::time::Duration;

/// How long a consumed request id stays reserved. Anything older also fails
/// the freshness window, so the two bounds overlap with margin.
pub const REPLAY_TTL: Duration = Duration::from_secs(10 * 60);

/// Outcome of attempting to reserve a request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The id was unseen and is now reserved.
    Reserved,
    /// A live marker already exists — replay.
    Duplicate,
}

/// Guards against replayed request ids.
///
/// The reservation is a single atomic insert-if-absent, so two concurrent
/// submissions of the same id cannot both pass. The verifier releases the
/// reservation if a later verification step fails, which keeps a legitimate
/// retry with a corrected signature possible under the same id.
#[derive(Clone)]
pub struct ReplayGuard {
    cache: Arc<dyn Cache>,
}

impl ReplayGuard {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(request_id: &str) -> String {
        format!("request_id:{request_id}")
    }

    /// Atomically reserve `request_id` for [`REPLAY_TTL`].
    pub async fn reserve(&self, request_id: &str) -> Result<Reservation, CacheError> {
        let inserted = self
            .cache
            .set_nx(&Self::key(request_id), "processed", Some(REPLAY_TTL))
            .await?;

        Ok(if inserted {
            Reservation::Reserved
        } else {
            Reservation::Duplicate
        })
    }

    /// Drop a reservation taken by [`reserve`](Self::reserve) after a later
    /// verification step failed.
    pub async fn release(&self, request_id: &str) -> Result<(), CacheError> {
        self.cache.remove(&Self::key(request_id)).await
    }

    /// Whether a live marker exists for `request_id`.
    pub async fn is_marked(&self, request_id: &str) -> Result<bool, CacheError> {
        Ok(self.cache.get(&Self::key(request_id)).await?.is_some())
    }
}
