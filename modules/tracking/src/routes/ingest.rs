//! Event ingestion: the business handler behind the gate.
//!
//! The JSON this handler sees is the *decrypted* payload — the gate already
//! swapped the envelope out. Events are always persisted, even when schema
//! validation fails; the verdict rides along on the row.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use cache_kit::Cache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{ErrorResponse, VerifiedRequest, WriteEvent};
use crate::stores::{PartnerStore, WriteEventStore};
use crate::validation::EventValidator;

/// How long a resolved system id stays cached per API key.
const SYSTEM_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct IngestState {
    pub partners: Arc<dyn PartnerStore>,
    pub write_events: Arc<dyn WriteEventStore>,
    pub validator: Arc<dyn EventValidator>,
    pub cache: Arc<dyn Cache>,
}

/// Decrypted ingest payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventRequest {
    pub api_key: String,
    pub event_name: String,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub anonymous_id: String,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventResponse {
    pub event_id: Uuid,
    pub is_valid: bool,
    pub validation_errors: Option<String>,
    pub received_at: DateTime<Utc>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("database_error", e.to_string())),
    )
}

pub async fn ingest_event(
    State(state): State<Arc<IngestState>>,
    Extension(verified): Extension<VerifiedRequest>,
    Json(request): Json<IngestEventRequest>,
) -> Result<Json<IngestEventResponse>, ApiError> {
    let started = std::time::Instant::now();

    tracing::info!(
        event_name = %request.event_name,
        partner = %verified.partner_code,
        request_id = %verified.request_id,
        "ingesting event"
    );

    let partner_system_id = resolve_system_id(&state, &request.api_key).await?;

    let properties_json = request
        .properties
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let verdict = state
        .validator
        .validate(partner_system_id, &request.event_name, &properties_json)
        .await;

    // Append-only: validation failures are recorded, never rejected.
    let event = WriteEvent::new(
        partner_system_id,
        request.event_name,
        request.event_timestamp,
        request.user_id,
        request.anonymous_id,
        Some(properties_json),
        verdict.is_valid,
        verdict.errors,
        request.correlation_id,
    )
    .map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("invalid_event", e.to_string())),
        )
    })?;

    state
        .write_events
        .insert(&event)
        .await
        .map_err(internal_error)?;

    tracing::info!(
        event_id = %event.id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        is_valid = event.is_valid,
        "event ingested"
    );

    Ok(Json(IngestEventResponse {
        event_id: event.id,
        is_valid: event.is_valid,
        validation_errors: event.validation_errors,
        received_at: Utc::now(),
    }))
}

/// Resolve the target partner system by API key, fronted by the cache.
async fn resolve_system_id(state: &IngestState, api_key: &str) -> Result<Uuid, ApiError> {
    let cache_key = format!("partner_system:apikey:{api_key}");

    if let Ok(Some(cached)) = state.cache.get(&cache_key).await {
        if let Ok(system_id) = Uuid::parse_str(&cached) {
            return Ok(system_id);
        }
    }

    let system = state
        .partners
        .find_system_by_api_key(api_key)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("auth_error", "invalid API key")),
            )
        })?;

    if !system.is_active {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "inactive_system",
                "partner system is not active",
            )),
        ));
    }

    if let Err(e) = state
        .cache
        .set(&cache_key, &system.id.to_string(), Some(SYSTEM_CACHE_TTL))
        .await
    {
        tracing::warn!(error = %e, "failed to cache partner system id");
    }

    Ok(system.id)
}
