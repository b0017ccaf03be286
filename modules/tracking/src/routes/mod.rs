pub mod events;
pub mod health;
pub mod ingest;

use crate::middleware::correlation::correlation_id_middleware;
use crate::middleware::decrypt::{decrypt_request, GateState};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Assemble the full application router: routes, the ingestion gate, and the
/// ambient layers. Shared between `main` and the HTTP tests.
pub fn router(
    ingest_state: Arc<ingest::IngestState>,
    events_state: Arc<events::EventsState>,
    gate_state: Arc<GateState>,
) -> Router {
    let ingest_router = Router::new()
        .route("/api/events", post(ingest::ingest_event))
        .with_state(ingest_state);

    let events_router = Router::new()
        .route(
            "/api/events/partner-system/{partner_system_id}",
            get(events::get_events_by_partner_system),
        )
        .route(
            "/api/events/partner-system/{partner_system_id}/statistics",
            get(events::get_event_statistics),
        )
        .with_state(events_state);

    Router::new()
        .route("/api/health", get(health::health))
        .merge(ingest_router)
        .merge(events_router)
        // envelope decryption and verification for mutating requests
        .layer(from_fn_with_state(gate_state, decrypt_request))
        // correlation id propagation
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
