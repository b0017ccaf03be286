//! Event schema validation seam.
//!
//! Partner-specific schema rules are a pluggable concern; the service only
//! depends on the binary verdict. Invalid events are still persisted with
//! `is_valid = false` — ingestion never rejects on validation grounds.

use async_trait::async_trait;
use uuid::Uuid;

/// Outcome of validating one event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_valid: bool,
    pub errors: Option<String>,
}

impl Verdict {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: None,
        }
    }

    pub fn invalid(errors: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: Some(errors.into()),
        }
    }
}

/// Validates an event's properties for a given partner system.
#[async_trait]
pub trait EventValidator: Send + Sync {
    async fn validate(
        &self,
        partner_system_id: Uuid,
        event_name: &str,
        properties_json: &str,
    ) -> Verdict;
}

/// Maximum accepted size of an event's properties payload.
const MAX_PROPERTIES_BYTES: usize = 100_000;

/// Baseline validator: properties must be well-formed JSON and within the
/// size cap. Schema-aware validation slots in behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct BasicEventValidator;

impl BasicEventValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventValidator for BasicEventValidator {
    async fn validate(
        &self,
        _partner_system_id: Uuid,
        event_name: &str,
        properties_json: &str,
    ) -> Verdict {
        if properties_json.len() > MAX_PROPERTIES_BYTES {
            return Verdict::invalid("event properties exceed maximum size of 100KB");
        }

        match serde_json::from_str::<serde_json::Value>(properties_json) {
            Ok(_) => Verdict::valid(),
            Err(e) => {
                tracing::warn!(event_name = %event_name, error = %e, "invalid JSON in event properties");
                Verdict::invalid(format!("invalid JSON format: {e}"))
            }
        }
    }
}
