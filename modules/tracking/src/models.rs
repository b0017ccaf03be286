//! Domain models shared by the verification path, the stores, and the
//! projection syncer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// The encrypted, signed wire payload submitted by a partner.
///
/// Exists only for the duration of one verification call; every field is the
/// raw string exactly as it appeared on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Base64 of `IV || AES-CBC ciphertext`.
    pub data: String,
    /// Partner-chosen UUID, unique per request within the replay window.
    pub request_id: String,
    /// UTC timestamp in `yyyyMMddHHmmss` form.
    pub request_time: String,
    /// Partner code identifying the key material to verify against.
    pub partner: String,
    /// Base64 RSA signature over `plaintext|requestTime|requestId|partner`.
    pub sign: String,
}

/// Request-scoped identity attached by the ingestion gate after a successful
/// verification, consumed by downstream handlers.
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub partner_id: Uuid,
    pub partner_code: String,
    pub request_id: String,
    pub request_time: DateTime<Utc>,
}

/// A partner account holding the key material requests are verified against.
///
/// Partners are soft-deactivated, never deleted; `is_active = false` keeps
/// the row (and its keys) but rejects its envelopes.
#[derive(Debug, Clone, FromRow)]
pub struct Partner {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub email: String,
    pub aes_key: String,
    pub rsa_public_key: String,
    pub rsa_private_key: String,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A source system owned by a partner; ingestion resolves the target system
/// by its API key carried inside the decrypted payload.
#[derive(Debug, Clone, FromRow)]
pub struct PartnerSystem {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub name: String,
    pub system_type: String,
    pub description: Option<String>,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event name is required")]
    MissingEventName,

    #[error("anonymous ID is required")]
    MissingAnonymousId,

    #[error("invalid event properties JSON")]
    InvalidPropertiesJson,
}

/// Write-side event row. Append-only: never updated or deleted after
/// creation. `created_at` is the ordering key the projection tails on.
#[derive(Debug, Clone, FromRow)]
pub struct WriteEvent {
    pub id: Uuid,
    pub partner_system_id: Uuid,
    pub event_name: String,
    pub event_timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub anonymous_id: String,
    pub properties_json: String,
    pub is_valid: bool,
    pub validation_errors: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl WriteEvent {
    /// Build a new write-side event. Events are persisted even when schema
    /// validation failed (`is_valid = false`); only structurally unusable
    /// input is refused here.
    pub fn new(
        partner_system_id: Uuid,
        event_name: String,
        event_timestamp: DateTime<Utc>,
        user_id: Option<String>,
        anonymous_id: String,
        properties_json: Option<String>,
        is_valid: bool,
        validation_errors: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<Self, EventError> {
        if event_name.trim().is_empty() {
            return Err(EventError::MissingEventName);
        }
        if anonymous_id.trim().is_empty() {
            return Err(EventError::MissingAnonymousId);
        }

        let properties_json = match properties_json {
            Some(json) if !json.trim().is_empty() => {
                if serde_json::from_str::<serde_json::Value>(&json).is_err() {
                    return Err(EventError::InvalidPropertiesJson);
                }
                json
            }
            _ => "{}".to_string(),
        };

        let correlation_id = correlation_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            id: Uuid::new_v4(),
            partner_system_id,
            event_name,
            event_timestamp,
            user_id,
            anonymous_id,
            properties_json,
            is_valid,
            validation_errors,
            correlation_id,
            created_at: Utc::now(),
        })
    }
}

/// Read-side denormalized row, one-to-one with a [`WriteEvent`].
///
/// Created only by the projection syncer and never updated; the uniqueness
/// of `write_event_id` is what makes reprocessing idempotent.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReadProjection {
    pub id: Uuid,
    pub write_event_id: Uuid,
    pub partner_system_id: Uuid,
    pub partner_id: Uuid,
    pub partner_name: String,
    pub system_name: String,
    pub event_name: String,
    pub event_timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub anonymous_id: String,
    pub properties_json: String,
    pub is_valid: bool,
    pub validation_errors: Option<String>,
    pub correlation_id: String,
    pub processed_at: DateTime<Utc>,
}

impl ReadProjection {
    /// Denormalize a write event with its resolved system and partner.
    pub fn from_event(event: &WriteEvent, system: &PartnerSystem, partner: &Partner) -> Self {
        Self {
            id: Uuid::new_v4(),
            write_event_id: event.id,
            partner_system_id: system.id,
            partner_id: partner.id,
            partner_name: partner.name.clone(),
            system_name: system.name.clone(),
            event_name: event.event_name.clone(),
            event_timestamp: event.event_timestamp,
            user_id: event.user_id.clone(),
            anonymous_id: event.anonymous_id.clone(),
            properties_json: event.properties_json.clone(),
            is_valid: event.is_valid,
            validation_errors: event.validation_errors.clone(),
            correlation_id: event.correlation_id.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// Error payload returned by the gate and the HTTP handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
