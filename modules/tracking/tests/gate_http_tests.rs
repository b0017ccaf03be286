//! End-to-end HTTP tests over the in-memory wiring: the ingestion gate,
//! the ingest handler, and the read-side endpoints, driven through the
//! router with `oneshot`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use cache_kit::InMemoryCache;
use chrono::Utc;
use common::{make_partner, make_system, sealed_envelope};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tracking_rs::middleware::decrypt::GateState;
use tracking_rs::models::{Partner, PartnerSystem};
use tracking_rs::routes;
use tracking_rs::routes::events::EventsState;
use tracking_rs::routes::ingest::IngestState;
use tracking_rs::stores::{
    InMemoryPartnerStore, InMemoryReadProjectionStore, InMemoryWriteEventStore, PartnerStore,
};
use tracking_rs::validation::BasicEventValidator;
use tracking_rs::verify::{EnvelopeVerifier, PartnerKeyResolver, ReplayGuard};
use uuid::Uuid;

struct App {
    router: Router,
    write_events: Arc<InMemoryWriteEventStore>,
}

async fn build_app(partner: &Partner, system: &PartnerSystem) -> App {
    let partners = Arc::new(InMemoryPartnerStore::new());
    partners.insert_partner(partner).await.unwrap();
    partners.insert_system(system).await.unwrap();

    let cache = Arc::new(InMemoryCache::new());
    let write_events = Arc::new(InMemoryWriteEventStore::new());
    let projections = Arc::new(InMemoryReadProjectionStore::new());

    let verifier = EnvelopeVerifier::new(
        PartnerKeyResolver::new(partners.clone(), cache.clone()),
        ReplayGuard::new(cache.clone()),
    );

    let router = routes::router(
        Arc::new(IngestState {
            partners,
            write_events: write_events.clone(),
            validator: Arc::new(BasicEventValidator::new()),
            cache: cache.clone(),
        }),
        Arc::new(EventsState {
            projections,
            cache,
        }),
        Arc::new(GateState { verifier }),
    );

    App {
        router,
        write_events,
    }
}

fn ingest_payload(api_key: &str) -> String {
    json!({
        "apiKey": api_key,
        "eventName": "page_view",
        "eventTimestamp": Utc::now().to_rfc3339(),
        "anonymousId": "anon-1",
        "properties": { "path": "/pricing" }
    })
    .to_string()
}

fn post_events(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sealed_ingest_request_lands_in_the_write_store() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let envelope = sealed_envelope(
        &partner,
        &ingest_payload("api-key-1"),
        &Uuid::new_v4().to_string(),
        Utc::now(),
    );
    let body = json!({
        "data": envelope.data,
        "requestId": envelope.request_id,
        "requestTime": envelope.request_time,
        "partner": envelope.partner,
        "sign": envelope.sign,
    })
    .to_string();

    let response = app.router.clone().oneshot(post_events(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["isValid"], Value::Bool(true));
    assert!(json["eventId"].is_string());

    assert_eq!(app.write_events.len().await, 1);
}

#[tokio::test]
async fn non_envelope_body_is_a_bad_request() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let response = app
        .router
        .clone()
        .oneshot(post_events(r#"{"eventName": "page_view"}"#.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.write_events.len().await, 0);
}

#[tokio::test]
async fn rejected_envelope_is_unauthorized_with_request_id() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let request_id = Uuid::new_v4().to_string();
    let mut envelope = sealed_envelope(
        &partner,
        &ingest_payload("api-key-1"),
        &request_id,
        Utc::now(),
    );
    envelope.sign = "AAAA".to_string();

    let body = json!({
        "data": envelope.data,
        "requestId": envelope.request_id,
        "requestTime": envelope.request_time,
        "partner": envelope.partner,
        "sign": envelope.sign,
    })
    .to_string();

    let response = app.router.clone().oneshot(post_events(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = response_json(response).await;
    assert_eq!(json["requestId"], Value::String(request_id));
    assert_eq!(json["error"], Value::String("Request verification failed".into()));
    // Key material never leaks into the response.
    assert!(!json.to_string().contains(&partner.aes_key));

    assert_eq!(app.write_events.len().await, 0);
}

#[tokio::test]
async fn unknown_api_key_inside_verified_envelope_is_unauthorized() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let envelope = sealed_envelope(
        &partner,
        &ingest_payload("wrong-api-key"),
        &Uuid::new_v4().to_string(),
        Utc::now(),
    );
    let body = json!({
        "data": envelope.data,
        "requestId": envelope.request_id,
        "requestTime": envelope.request_time,
        "partner": envelope.partner,
        "sign": envelope.sign,
    })
    .to_string();

    let response = app.router.clone().oneshot(post_events(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.write_events.len().await, 0);
}

#[tokio::test]
async fn health_endpoint_bypasses_the_gate() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["status"], Value::String("healthy".into()));
}

#[tokio::test]
async fn read_side_queries_bypass_the_gate() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/events/partner-system/{}", system.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["totalCount"], Value::Number(0.into()));
}

#[tokio::test]
async fn invalid_event_properties_are_stored_flagged_not_rejected() {
    let partner = make_partner("acme");
    let system = make_system(&partner, "api-key-1");
    let app = build_app(&partner, &system).await;

    // Oversized properties fail validation, but ingestion still persists
    // the event with the verdict attached.
    let payload = json!({
        "apiKey": "api-key-1",
        "eventName": "page_view",
        "eventTimestamp": Utc::now().to_rfc3339(),
        "anonymousId": "anon-1",
        "properties": { "blob": "x".repeat(120_000) }
    })
    .to_string();

    let envelope = sealed_envelope(&partner, &payload, &Uuid::new_v4().to_string(), Utc::now());
    let body = json!({
        "data": envelope.data,
        "requestId": envelope.request_id,
        "requestTime": envelope.request_time,
        "partner": envelope.partner,
        "sign": envelope.sign,
    })
    .to_string();

    let response = app.router.clone().oneshot(post_events(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["isValid"], Value::Bool(false));
    assert!(json["validationErrors"].is_string());

    assert_eq!(app.write_events.len().await, 1);
}
