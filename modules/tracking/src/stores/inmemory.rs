//! In-memory implementations of the store traits for tests and local
//! development.
//!
//! Semantics mirror the Postgres backend: the read store enforces
//! `write_event_id` uniqueness so idempotence behaves identically, and the
//! watermark never regresses. An outage can be simulated per store to
//! exercise the syncer's retry path.

use crate::models::{Partner, PartnerSystem, ReadProjection, WriteEvent};
use crate::stores::{
    epoch, PartnerStore, ProjectionQuery, ProjectionStats, ReadProjectionStore, StoreError,
    StoreResult, WatermarkStore, WriteEventStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct PartnerTables {
    partners: Vec<Partner>,
    systems: Vec<PartnerSystem>,
}

/// Partner store backed by plain vectors.
#[derive(Default, Clone)]
pub struct InMemoryPartnerStore {
    tables: Arc<RwLock<PartnerTables>>,
}

impl InMemoryPartnerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartnerStore for InMemoryPartnerStore {
    async fn find_partner_by_code(&self, code: &str) -> StoreResult<Option<Partner>> {
        let tables = self.tables.read().await;
        Ok(tables.partners.iter().find(|p| p.code == code).cloned())
    }

    async fn find_partner_by_id(&self, id: Uuid) -> StoreResult<Option<Partner>> {
        let tables = self.tables.read().await;
        Ok(tables.partners.iter().find(|p| p.id == id).cloned())
    }

    async fn insert_partner(&self, partner: &Partner) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .partners
            .iter()
            .any(|p| p.code == partner.code || p.email == partner.email)
        {
            return Err(StoreError::Conflict(format!(
                "partner code or email already exists: {}",
                partner.code
            )));
        }
        tables.partners.push(partner.clone());
        Ok(())
    }

    async fn find_system_by_api_key(&self, api_key: &str) -> StoreResult<Option<PartnerSystem>> {
        let tables = self.tables.read().await;
        Ok(tables.systems.iter().find(|s| s.api_key == api_key).cloned())
    }

    async fn find_system_by_id(&self, id: Uuid) -> StoreResult<Option<PartnerSystem>> {
        let tables = self.tables.read().await;
        Ok(tables.systems.iter().find(|s| s.id == id).cloned())
    }

    async fn insert_system(&self, system: &PartnerSystem) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.systems.iter().any(|s| s.api_key == system.api_key) {
            return Err(StoreError::Conflict(
                "system API key already exists".to_string(),
            ));
        }
        tables.systems.push(system.clone());
        Ok(())
    }
}

/// Append-only write store backed by a vector.
#[derive(Default, Clone)]
pub struct InMemoryWriteEventStore {
    events: Arc<RwLock<Vec<WriteEvent>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryWriteEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage; every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write store offline".to_string()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl WriteEventStore for InMemoryWriteEventStore {
    async fn insert(&self, event: &WriteEvent) -> StoreResult<()> {
        self.check_available()?;
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn fetch_created_after(
        &self,
        watermark: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WriteEvent>> {
        self.check_available()?;

        let events = self.events.read().await;
        let mut batch: Vec<WriteEvent> = events
            .iter()
            .filter(|e| e.created_at > watermark)
            .cloned()
            .collect();
        batch.sort_by_key(|e| e.created_at);
        batch.truncate(limit.max(0) as usize);
        Ok(batch)
    }
}

/// Read store backed by a vector plus a `write_event_id` uniqueness set.
#[derive(Default, Clone)]
pub struct InMemoryReadProjectionStore {
    rows: Arc<RwLock<Vec<ReadProjection>>>,
    seen_write_events: Arc<RwLock<HashSet<Uuid>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryReadProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage; every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read store offline".to_string()));
        }
        Ok(())
    }

    pub async fn all(&self) -> Vec<ReadProjection> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl ReadProjectionStore for InMemoryReadProjectionStore {
    async fn append_batch(&self, projections: &[ReadProjection]) -> StoreResult<u64> {
        self.check_available()?;

        let mut rows = self.rows.write().await;
        let mut seen = self.seen_write_events.write().await;
        let mut inserted = 0u64;

        for projection in projections {
            if seen.insert(projection.write_event_id) {
                rows.push(projection.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn query(&self, query: &ProjectionQuery) -> StoreResult<Vec<ReadProjection>> {
        self.check_available()?;

        let rows = self.rows.read().await;
        let mut matching: Vec<ReadProjection> = rows
            .iter()
            .filter(|r| r.partner_system_id == query.partner_system_id)
            .filter(|r| query.start.map_or(true, |start| r.event_timestamp >= start))
            .filter(|r| query.end.map_or(true, |end| r.event_timestamp <= end))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.event_timestamp.cmp(&a.event_timestamp));

        let offset = ((query.page.max(1) - 1) * query.page_size).max(0) as usize;
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(query.page_size.max(0) as usize)
            .collect())
    }

    async fn count(
        &self,
        partner_system_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        self.check_available()?;

        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| r.partner_system_id == partner_system_id)
            .filter(|r| start.map_or(true, |s| r.event_timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.event_timestamp <= e))
            .count() as i64)
    }

    async fn statistics(
        &self,
        partner_system_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<ProjectionStats> {
        self.check_available()?;

        let rows = self.rows.read().await;
        let mut stats = ProjectionStats::default();
        let mut by_name: HashMap<String, i64> = HashMap::new();

        for row in rows
            .iter()
            .filter(|r| r.partner_system_id == partner_system_id)
            .filter(|r| r.event_timestamp >= start && r.event_timestamp <= end)
        {
            stats.total += 1;
            if row.is_valid {
                stats.valid += 1;
            }
            *by_name.entry(row.event_name.clone()).or_default() += 1;
        }

        stats.invalid = stats.total - stats.valid;
        stats.by_event_name = by_name.into_iter().collect();
        stats
            .by_event_name
            .sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(stats)
    }
}

/// Watermark held in memory — used by tests; production uses the durable
/// Postgres row.
#[derive(Clone)]
pub struct InMemoryWatermarkStore {
    watermark: Arc<RwLock<DateTime<Utc>>>,
}

impl Default for InMemoryWatermarkStore {
    fn default() -> Self {
        Self {
            watermark: Arc::new(RwLock::new(epoch())),
        }
    }
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to an arbitrary value — test hook for reprocessing scenarios.
    pub async fn reset(&self, to: DateTime<Utc>) {
        *self.watermark.write().await = to;
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn load(&self) -> StoreResult<DateTime<Utc>> {
        Ok(*self.watermark.read().await)
    }

    async fn advance(&self, to: DateTime<Utc>) -> StoreResult<()> {
        let mut watermark = self.watermark.write().await;
        if to > *watermark {
            *watermark = to;
        }
        Ok(())
    }
}
