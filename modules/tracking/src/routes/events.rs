//! Read-side queries over the denormalized projection store.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use cache_kit::Cache;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{ErrorResponse, ReadProjection};
use crate::stores::{ProjectionQuery, ReadProjectionStore};

/// How long a statistics snapshot stays cached.
const STATS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

pub struct EventsState {
    pub projections: Arc<dyn ReadProjectionStore>,
    pub cache: Arc<dyn Cache>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("database_error", e.to_string())),
    )
}

#[derive(Debug, Deserialize)]
pub struct EventsQueryParams {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEventDto {
    pub id: Uuid,
    pub partner_system_id: Uuid,
    pub partner_id: Uuid,
    pub partner_name: String,
    pub system_name: String,
    pub event_name: String,
    pub event_timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub anonymous_id: String,
    pub properties: String,
    pub is_valid: bool,
    pub validation_errors: Option<String>,
    pub correlation_id: String,
    pub processed_at: DateTime<Utc>,
}

impl From<ReadProjection> for TrackingEventDto {
    fn from(row: ReadProjection) -> Self {
        Self {
            id: row.id,
            partner_system_id: row.partner_system_id,
            partner_id: row.partner_id,
            partner_name: row.partner_name,
            system_name: row.system_name,
            event_name: row.event_name,
            event_timestamp: row.event_timestamp,
            user_id: row.user_id,
            anonymous_id: row.anonymous_id,
            properties: row.properties_json,
            is_valid: row.is_valid,
            validation_errors: row.validation_errors,
            correlation_id: row.correlation_id,
            processed_at: row.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPageResponse {
    pub events: Vec<TrackingEventDto>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
}

/// `GET /api/events/partner-system/{id}` — paged, optionally date-bounded.
pub async fn get_events_by_partner_system(
    State(state): State<Arc<EventsState>>,
    Path(partner_system_id): Path<Uuid>,
    Query(params): Query<EventsQueryParams>,
) -> Result<Json<EventsPageResponse>, ApiError> {
    tracing::info!(partner_system_id = %partner_system_id, "querying events");

    let page = params.page.max(1);
    let page_size = params.page_size.clamp(1, MAX_PAGE_SIZE);

    let query = ProjectionQuery {
        partner_system_id,
        start: params.start_date,
        end: params.end_date,
        page,
        page_size,
    };

    let events = state
        .projections
        .query(&query)
        .await
        .map_err(internal_error)?;

    let total_count = state
        .projections
        .count(partner_system_id, params.start_date, params.end_date)
        .await
        .map_err(internal_error)?;

    Ok(Json(EventsPageResponse {
        events: events.into_iter().map(Into::into).collect(),
        total_count,
        page,
        page_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQueryParams {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatisticsResponse {
    pub partner_system_id: Uuid,
    pub total_events: i64,
    pub valid_events: i64,
    pub invalid_events: i64,
    pub events_by_name: BTreeMap<String, i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// `GET /api/events/partner-system/{id}/statistics` — aggregates over a
/// date range (default: last 30 days), cached for five minutes.
pub async fn get_event_statistics(
    State(state): State<Arc<EventsState>>,
    Path(partner_system_id): Path<Uuid>,
    Query(params): Query<StatsQueryParams>,
) -> Result<Json<EventStatisticsResponse>, ApiError> {
    let end_date = params.end_date.unwrap_or_else(Utc::now);
    let start_date = params
        .start_date
        .unwrap_or_else(|| end_date - ChronoDuration::days(30));

    let cache_key = format!(
        "stats:{partner_system_id}:{}:{}",
        start_date.format("%Y%m%d"),
        end_date.format("%Y%m%d")
    );

    if let Ok(Some(cached)) = state.cache.get(&cache_key).await {
        if let Ok(stats) = serde_json::from_str::<EventStatisticsResponse>(&cached) {
            tracing::debug!(partner_system_id = %partner_system_id, "returning cached statistics");
            return Ok(Json(stats));
        }
    }

    let stats = state
        .projections
        .statistics(partner_system_id, start_date, end_date)
        .await
        .map_err(internal_error)?;

    let response = EventStatisticsResponse {
        partner_system_id,
        total_events: stats.total,
        valid_events: stats.valid,
        invalid_events: stats.invalid,
        events_by_name: stats.by_event_name.into_iter().collect(),
        start_date,
        end_date,
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        if let Err(e) = state
            .cache
            .set(&cache_key, &serialized, Some(STATS_CACHE_TTL))
            .await
        {
            tracing::warn!(error = %e, "failed to cache statistics");
        }
    }

    Ok(Json(response))
}
