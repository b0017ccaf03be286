//! The ingestion gate: every mutating request is decrypted and verified
//! before it reaches a business handler.
//!
//! Read-only and operational endpoints bypass the gate entirely. On
//! acceptance the encrypted body is swapped for the decrypted plaintext and
//! the partner identity travels on as a request extension; on rejection the
//! caller gets a 401 carrying the rejection reason and the offending request
//! id — never key material.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::models::{Envelope, ErrorResponse};
use crate::verify::EnvelopeVerifier;

/// Paths exempt from verification: health checks, metrics, API docs.
const BYPASS_PREFIXES: &[&str] = &["/api/health", "/health", "/metrics", "/docs", "/openapi"];

/// Upper bound on the buffered envelope body.
const MAX_ENVELOPE_BYTES: usize = 2 * 1024 * 1024;

pub struct GateState {
    pub verifier: EnvelopeVerifier,
}

/// Axum middleware applying the verification protocol to mutating requests.
pub async fn decrypt_request(
    State(state): State<Arc<GateState>>,
    request: Request,
    next: Next,
) -> Response {
    // Only mutating requests carry envelopes.
    let method = request.method().clone();
    if method != Method::POST && method != Method::PUT && method != Method::PATCH {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if BYPASS_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_ENVELOPE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "Invalid request",
                    "Request body could not be read",
                )),
            )
                .into_response();
        }
    };

    let envelope: Envelope = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse request as encrypted envelope");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "Invalid request format",
                    "Request must be in encrypted envelope format",
                )),
            )
                .into_response();
        }
    };

    match state.verifier.verify(&envelope).await {
        Err(reason) => {
            tracing::warn!(
                error = %reason,
                partner = %envelope.partner,
                request_id = %envelope.request_id,
                "request verification failed"
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(
                    ErrorResponse::new("Request verification failed", reason.to_string())
                        .with_request_id(envelope.request_id.clone()),
                ),
            )
                .into_response()
        }
        Ok(verified) => {
            parts.extensions.insert(verified.to_request_context());

            // The downstream handler sees only the decrypted payload.
            let plaintext = verified.plaintext;
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(plaintext.len()));
            parts.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            let request = Request::from_parts(parts, Body::from(plaintext));
            next.run(request).await
        }
    }
}
