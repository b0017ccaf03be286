//! Postgres implementations of the store traits.
//!
//! The write store and the partner tables live in the write database; the
//! projection table and the sync watermark live in the read database. Event
//! properties are stored as `jsonb` and surfaced to the models as text.

use crate::models::{Partner, PartnerSystem, ReadProjection, WriteEvent};
use crate::stores::{
    PartnerStore, ProjectionQuery, ProjectionStats, ReadProjectionStore, StoreError, StoreResult,
    WatermarkStore, WriteEventStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Partner and partner-system access against the write database.
#[derive(Clone)]
pub struct PgPartnerStore {
    pool: PgPool,
}

impl PgPartnerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartnerStore for PgPartnerStore {
    async fn find_partner_by_code(&self, code: &str) -> StoreResult<Option<Partner>> {
        let partner = sqlx::query_as::<_, Partner>(
            r#"
            SELECT
                id, code, name, email, aes_key, rsa_public_key, rsa_private_key,
                is_active, deactivated_at, created_at
            FROM partners
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(partner)
    }

    async fn find_partner_by_id(&self, id: Uuid) -> StoreResult<Option<Partner>> {
        let partner = sqlx::query_as::<_, Partner>(
            r#"
            SELECT
                id, code, name, email, aes_key, rsa_public_key, rsa_private_key,
                is_active, deactivated_at, created_at
            FROM partners
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(partner)
    }

    async fn insert_partner(&self, partner: &Partner) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partners
                (id, code, name, email, aes_key, rsa_public_key, rsa_private_key,
                 is_active, deactivated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(partner.id)
        .bind(&partner.code)
        .bind(&partner.name)
        .bind(&partner.email)
        .bind(&partner.aes_key)
        .bind(&partner.rsa_public_key)
        .bind(&partner.rsa_private_key)
        .bind(partner.is_active)
        .bind(partner.deactivated_at)
        .bind(partner.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("partner code or email already exists: {e}"))
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn find_system_by_api_key(&self, api_key: &str) -> StoreResult<Option<PartnerSystem>> {
        let system = sqlx::query_as::<_, PartnerSystem>(
            r#"
            SELECT id, partner_id, name, system_type, description, api_key,
                   is_active, created_at
            FROM partner_systems
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(system)
    }

    async fn find_system_by_id(&self, id: Uuid) -> StoreResult<Option<PartnerSystem>> {
        let system = sqlx::query_as::<_, PartnerSystem>(
            r#"
            SELECT id, partner_id, name, system_type, description, api_key,
                   is_active, created_at
            FROM partner_systems
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(system)
    }

    async fn insert_system(&self, system: &PartnerSystem) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_systems
                (id, partner_id, name, system_type, description, api_key,
                 is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(system.id)
        .bind(system.partner_id)
        .bind(&system.name)
        .bind(&system.system_type)
        .bind(&system.description)
        .bind(&system.api_key)
        .bind(system.is_active)
        .bind(system.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("system API key already exists: {e}"))
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(())
    }
}

/// Append-only event store against the write database.
#[derive(Clone)]
pub struct PgWriteEventStore {
    pool: PgPool,
}

impl PgWriteEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WriteEventStore for PgWriteEventStore {
    async fn insert(&self, event: &WriteEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking_events
                (id, partner_system_id, event_name, event_timestamp, user_id,
                 anonymous_id, properties_json, is_valid, validation_errors,
                 correlation_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.partner_system_id)
        .bind(&event.event_name)
        .bind(event.event_timestamp)
        .bind(&event.user_id)
        .bind(&event.anonymous_id)
        .bind(&event.properties_json)
        .bind(event.is_valid)
        .bind(&event.validation_errors)
        .bind(&event.correlation_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_created_after(
        &self,
        watermark: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WriteEvent>> {
        let events = sqlx::query_as::<_, WriteEvent>(
            r#"
            SELECT
                id, partner_system_id, event_name, event_timestamp, user_id,
                anonymous_id, properties_json::text AS properties_json,
                is_valid, validation_errors, correlation_id, created_at
            FROM tracking_events
            WHERE created_at > $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(watermark)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// Denormalized projection store against the read database.
#[derive(Clone)]
pub struct PgReadProjectionStore {
    pool: PgPool,
}

impl PgReadProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadProjectionStore for PgReadProjectionStore {
    async fn append_batch(&self, projections: &[ReadProjection]) -> StoreResult<u64> {
        if projections.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for projection in projections {
            let result = sqlx::query(
                r#"
                INSERT INTO tracking_events_read
                    (id, write_event_id, partner_system_id, partner_id,
                     partner_name, system_name, event_name, event_timestamp,
                     user_id, anonymous_id, properties_json, is_valid,
                     validation_errors, correlation_id, processed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::jsonb,
                        $12, $13, $14, $15)
                ON CONFLICT (write_event_id) DO NOTHING
                "#,
            )
            .bind(projection.id)
            .bind(projection.write_event_id)
            .bind(projection.partner_system_id)
            .bind(projection.partner_id)
            .bind(&projection.partner_name)
            .bind(&projection.system_name)
            .bind(&projection.event_name)
            .bind(projection.event_timestamp)
            .bind(&projection.user_id)
            .bind(&projection.anonymous_id)
            .bind(&projection.properties_json)
            .bind(projection.is_valid)
            .bind(&projection.validation_errors)
            .bind(&projection.correlation_id)
            .bind(projection.processed_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn query(&self, query: &ProjectionQuery) -> StoreResult<Vec<ReadProjection>> {
        let offset = (query.page.max(1) - 1) * query.page_size;

        let rows = sqlx::query_as::<_, ReadProjection>(
            r#"
            SELECT
                id, write_event_id, partner_system_id, partner_id,
                partner_name, system_name, event_name, event_timestamp,
                user_id, anonymous_id, properties_json::text AS properties_json,
                is_valid, validation_errors, correlation_id, processed_at
            FROM tracking_events_read
            WHERE partner_system_id = $1
              AND ($2::timestamptz IS NULL OR event_timestamp >= $2)
              AND ($3::timestamptz IS NULL OR event_timestamp <= $3)
            ORDER BY event_timestamp DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.partner_system_id)
        .bind(query.start)
        .bind(query.end)
        .bind(query.page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn count(
        &self,
        partner_system_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM tracking_events_read
            WHERE partner_system_id = $1
              AND ($2::timestamptz IS NULL OR event_timestamp >= $2)
              AND ($3::timestamptz IS NULL OR event_timestamp <= $3)
            "#,
        )
        .bind(partner_system_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn statistics(
        &self,
        partner_system_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<ProjectionStats> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_valid) AS valid
            FROM tracking_events_read
            WHERE partner_system_id = $1
              AND event_timestamp >= $2
              AND event_timestamp <= $3
            "#,
        )
        .bind(partner_system_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = totals.try_get("total")?;
        let valid: i64 = totals.try_get("valid")?;

        let by_event_name = sqlx::query(
            r#"
            SELECT event_name, COUNT(*) AS event_count
            FROM tracking_events_read
            WHERE partner_system_id = $1
              AND event_timestamp >= $2
              AND event_timestamp <= $3
            GROUP BY event_name
            ORDER BY event_count DESC, event_name
            "#,
        )
        .bind(partner_system_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            let name: String = row.try_get("event_name")?;
            let count: i64 = row.try_get("event_count")?;
            Ok((name, count))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(ProjectionStats {
            total,
            valid,
            invalid: total - valid,
            by_event_name,
        })
    }
}

/// Durable sync cursor stored as a single row in the read database.
#[derive(Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn load(&self) -> StoreResult<DateTime<Utc>> {
        let watermark: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_processed_at FROM sync_watermark WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(watermark.unwrap_or_else(crate::stores::epoch))
    }

    async fn advance(&self, to: DateTime<Utc>) -> StoreResult<()> {
        // GREATEST guards against regression if a stale value is ever handed
        // in; the watermark is monotonic by contract.
        sqlx::query(
            r#"
            INSERT INTO sync_watermark (id, last_processed_at)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE
            SET last_processed_at = GREATEST(sync_watermark.last_processed_at, EXCLUDED.last_processed_at)
            "#,
        )
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
