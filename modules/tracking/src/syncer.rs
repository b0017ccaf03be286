//! Projection syncer: tails the write store and keeps the denormalized read
//! store eventually consistent.
//!
//! One instance runs per deployment. Each cycle reads the durable watermark,
//! fetches the next ascending batch of write events, enriches them with
//! partner and system identity, appends the batch to the read store, and
//! advances the watermark. Delivery is at-least-once: a crash between the
//! append and the advance reprocesses rows, and the read store's
//! `write_event_id` uniqueness absorbs them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Partner, PartnerSystem, ReadProjection};
use crate::stores::{
    PartnerStore, ReadProjectionStore, StoreError, WatermarkStore, WriteEventStore,
};

/// Tuning knobs for the polling loop, injectable for tests.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Sleep between polls when a cycle did not return a full batch.
    pub poll_interval: Duration,
    /// Maximum write events fetched per cycle.
    pub batch_size: i64,
    /// Grace period before the first cycle so the stores are reachable.
    pub startup_delay: Duration,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 1000,
            startup_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one cycle did — returned for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Write events fetched past the watermark.
    pub fetched: usize,
    /// Projections actually inserted (conflicts excluded).
    pub projected: u64,
    /// Events dropped because their partner/system could not be resolved.
    pub skipped: usize,
    /// The watermark after this cycle, if it advanced.
    pub watermark: Option<DateTime<Utc>>,
}

pub struct ProjectionSyncer {
    partners: Arc<dyn PartnerStore>,
    write_events: Arc<dyn WriteEventStore>,
    projections: Arc<dyn ReadProjectionStore>,
    watermark: Arc<dyn WatermarkStore>,
    config: SyncerConfig,
}

impl ProjectionSyncer {
    pub fn new(
        partners: Arc<dyn PartnerStore>,
        write_events: Arc<dyn WriteEventStore>,
        projections: Arc<dyn ReadProjectionStore>,
        watermark: Arc<dyn WatermarkStore>,
        config: SyncerConfig,
    ) -> Self {
        Self {
            partners,
            write_events,
            projections,
            watermark,
            config,
        }
    }

    /// Run the polling loop until `cancel` fires.
    ///
    /// Cancellation is observed before each cycle and during each sleep; an
    /// in-flight cycle always completes its batch write before the task
    /// exits.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "projection syncer started"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("projection syncer stopped before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.config.startup_delay) => {}
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let drained_full_batch = match self.run_cycle().await {
                Ok(outcome) => {
                    if outcome.fetched > 0 {
                        tracing::info!(
                            fetched = outcome.fetched,
                            projected = outcome.projected,
                            skipped = outcome.skipped,
                            "projection cycle complete"
                        );
                    }
                    outcome.fetched as i64 >= self.config.batch_size
                }
                Err(e) => {
                    // Transient store outage: the watermark is untouched, so
                    // the next poll simply retries the same batch.
                    tracing::error!(error = %e, "projection cycle failed");
                    false
                }
            };

            // A full batch means there is likely backlog — keep draining.
            if drained_full_batch {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("projection syncer stopped");
    }

    /// Execute one sync cycle. Public so tests can drive the syncer
    /// deterministically without the polling loop.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        let watermark = self.watermark.load().await?;
        let batch = self
            .write_events
            .fetch_created_after(watermark, self.config.batch_size)
            .await?;

        if batch.is_empty() {
            return Ok(CycleOutcome::default());
        }

        tracing::info!(count = batch.len(), "processing new write events");

        // Lookups are memoized per cycle; batches are dominated by a handful
        // of systems.
        let mut system_memo: HashMap<Uuid, Option<PartnerSystem>> = HashMap::new();
        let mut partner_memo: HashMap<Uuid, Option<Partner>> = HashMap::new();

        let mut projections = Vec::with_capacity(batch.len());
        let mut skipped = 0usize;
        let mut max_created_at = watermark;

        for event in &batch {
            if event.created_at > max_created_at {
                max_created_at = event.created_at;
            }

            let Some(system) = self
                .resolve_system(&mut system_memo, event.partner_system_id)
                .await?
            else {
                tracing::warn!(
                    partner_system_id = %event.partner_system_id,
                    event_id = %event.id,
                    "partner system not found for event; skipping"
                );
                skipped += 1;
                continue;
            };

            let Some(partner) = self
                .resolve_partner(&mut partner_memo, system.partner_id)
                .await?
            else {
                tracing::warn!(
                    partner_id = %system.partner_id,
                    event_id = %event.id,
                    "partner not found for event; skipping"
                );
                skipped += 1;
                continue;
            };

            projections.push(ReadProjection::from_event(event, &system, &partner));
        }

        let projected = if projections.is_empty() {
            0
        } else {
            self.projections.append_batch(&projections).await?
        };

        // The watermark covers the whole fetched batch: unresolvable events
        // are skipped permanently, not retried. It advances only after the
        // batch write succeeded.
        self.watermark.advance(max_created_at).await?;

        Ok(CycleOutcome {
            fetched: batch.len(),
            projected,
            skipped,
            watermark: Some(max_created_at),
        })
    }

    async fn resolve_system(
        &self,
        memo: &mut HashMap<Uuid, Option<PartnerSystem>>,
        id: Uuid,
    ) -> Result<Option<PartnerSystem>, StoreError> {
        if let Some(cached) = memo.get(&id) {
            return Ok(cached.clone());
        }
        let system = self.partners.find_system_by_id(id).await?;
        memo.insert(id, system.clone());
        Ok(system)
    }

    async fn resolve_partner(
        &self,
        memo: &mut HashMap<Uuid, Option<Partner>>,
        id: Uuid,
    ) -> Result<Option<Partner>, StoreError> {
        if let Some(cached) = memo.get(&id) {
            return Ok(cached.clone());
        }
        let partner = self.partners.find_partner_by_id(id).await?;
        memo.insert(id, partner.clone());
        Ok(partner)
    }
}
