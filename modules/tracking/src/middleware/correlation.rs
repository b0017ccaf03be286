use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Propagates the caller's correlation id, or mints one, and echoes it on
/// the response.
pub async fn correlation_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(correlation_id.clone()));

    let mut res = next.run(req).await;
    let headers: &mut HeaderMap = res.headers_mut();
    headers.insert(
        CORRELATION_ID_HEADER,
        HeaderValue::from_str(&correlation_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );
    res
}

/// Request-scoped correlation id extension.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);
