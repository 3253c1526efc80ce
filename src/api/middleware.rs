//! Cross-cutting axum middleware: backend shared-secret auth for the
//! discovery API, and a request-id stamp shared by both routers.
//!
//! Grounded on `dashflow-registry/src/api/middleware.rs`'s request-scoped
//! middleware pattern; the timing-safe secret comparison uses `subtle`
//! instead of `==` so the backend token check can't leak its length or
//! prefix through a timing side channel.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::api::state::DiscoveryState;

const BACKEND_TOKEN_HEADER: &str = "x-backend-token";

/// Requires a matching `X-Backend-Token` header when `state.backend_secret`
/// is set. Exempts `/v1/tools` and `/v1/chat`, which front-end agents call
/// directly without holding the backend secret, per SPEC_FULL.md §6.
pub async fn require_backend_token(
    State(state): State<DiscoveryState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.backend_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let path = request.uri().path();
    if path == "/v1/tools" || path == "/v1/chat" {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(BACKEND_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// Stamps every response with an `X-Request-Id` header so a caller can
/// correlate it with this service's tracing spans.
pub async fn request_id(request: Request<Body>, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
