//! Store seams for the write side, the read side, and the projection
//! watermark.
//!
//! Each store is a trait with two implementations: a Postgres backend for
//! production and an in-memory backend for tests and local development,
//! selected at wiring time. The verification path and the syncer only ever
//! see the traits.

pub mod inmemory;
pub mod postgres;

pub use inmemory::{
    InMemoryPartnerStore, InMemoryReadProjectionStore, InMemoryWatermarkStore,
    InMemoryWriteEventStore,
};
pub use postgres::{
    PgPartnerStore, PgReadProjectionStore, PgWatermarkStore, PgWriteEventStore,
};

use crate::models::{Partner, PartnerSystem, ReadProjection, WriteEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Errors surfaced by any store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partner and partner-system lookups backing key resolution, ingestion,
/// and projection enrichment.
#[async_trait]
pub trait PartnerStore: Send + Sync {
    async fn find_partner_by_code(&self, code: &str) -> StoreResult<Option<Partner>>;
    async fn find_partner_by_id(&self, id: Uuid) -> StoreResult<Option<Partner>>;
    async fn insert_partner(&self, partner: &Partner) -> StoreResult<()>;

    async fn find_system_by_api_key(&self, api_key: &str) -> StoreResult<Option<PartnerSystem>>;
    async fn find_system_by_id(&self, id: Uuid) -> StoreResult<Option<PartnerSystem>>;
    async fn insert_system(&self, system: &PartnerSystem) -> StoreResult<()>;
}

/// Append-only write store for tracking events.
#[async_trait]
pub trait WriteEventStore: Send + Sync {
    async fn insert(&self, event: &WriteEvent) -> StoreResult<()>;

    /// Events with `created_at > watermark`, ordered by `created_at`
    /// ascending, capped at `limit`.
    async fn fetch_created_after(
        &self,
        watermark: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WriteEvent>>;
}

/// Paged filter for read-side queries.
#[derive(Debug, Clone)]
pub struct ProjectionQuery {
    pub partner_system_id: Uuid,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub page: i64,
    pub page_size: i64,
}

/// Aggregates served by the statistics endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProjectionStats {
    pub total: i64,
    pub valid: i64,
    pub invalid: i64,
    pub by_event_name: Vec<(String, i64)>,
}

/// Append-only, query-optimized read store.
#[async_trait]
pub trait ReadProjectionStore: Send + Sync {
    /// Append a batch in one write. Rows whose `write_event_id` already
    /// exists are silently skipped (reprocessing idempotence); returns the
    /// number of rows actually inserted.
    async fn append_batch(&self, projections: &[ReadProjection]) -> StoreResult<u64>;

    async fn query(&self, query: &ProjectionQuery) -> StoreResult<Vec<ReadProjection>>;

    async fn count(
        &self,
        partner_system_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;

    async fn statistics(
        &self,
        partner_system_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<ProjectionStats>;
}

/// Durable cursor over the write store's `created_at` axis.
///
/// The watermark only ever advances; implementations must guard against
/// regression even if handed an older value.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The current watermark, or the Unix epoch if none has been persisted.
    async fn load(&self) -> StoreResult<DateTime<Utc>>;

    async fn advance(&self, to: DateTime<Utc>) -> StoreResult<()>;
}

/// Starting watermark for a fresh deployment.
pub fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}
