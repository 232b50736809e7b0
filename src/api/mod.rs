//! HTTP boundary.
//!
//! `/extend` is reachable without admin credentials (the token in the link
//! is the credential); everything under `/api` requires the admin key.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use base64::Engine;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::connector::ConnectorSet;
use crate::errors::AppError;
use crate::metrics::Metrics;
use crate::store::Registry;

pub mod extend;
pub mod handlers;

/// Shared state handed to every handler.
pub struct AppState {
    pub registry: Arc<dyn Registry>,
    pub connectors: ConnectorSet,
    pub metrics: Metrics,
    pub admin_api_key: String,
    /// Upper bound for a single extension.
    pub max_extend: Duration,
    /// TTL for manually added environments that do not name one.
    pub default_ttl: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route(
            "/environments",
            get(handlers::list_environments).post(handlers::add_environment),
        )
        .route(
            "/environments/*id",
            axum::routing::delete(handlers::delete_environment),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics))
        .route("/extend", get(extend::extend_handler))
        .nest("/api", admin)
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> AppError {
    AppError::NotFound("no such route".into())
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// Middleware: accepts the admin key as `Authorization: Basic <base64(key)>`,
/// `Authorization: Bearer <key>` or `X-Admin-Key: <key>`.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.admin_api_key.as_bytes();
    if expected.is_empty() {
        tracing::error!("admin API: admin_api_key is not configured");
        return Err(AppError::Unauthorized);
    }

    match presented_key(req.headers()) {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected)) => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key.
            let masked = match (k.len() > 8, k.get(..4), k.get(k.len().saturating_sub(4)..)) {
                (true, Some(head), Some(tail)) => format!("{head}…{tail}"),
                _ => "****".to_string(),
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("admin API: missing credentials");
            Err(AppError::Unauthorized)
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-admin-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }

    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    String::from_utf8(decoded).ok()
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers. Extension links carry a token in the query
/// string, so referrers are stripped and responses never cached.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presented_key_forms() {
        let mut h = HeaderMap::new();
        assert_eq!(presented_key(&h), None);

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic c2VjcmV0"));
        assert_eq!(presented_key(&h).as_deref(), Some("secret"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret "));
        assert_eq!(presented_key(&h).as_deref(), Some("secret"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic %%%"));
        assert_eq!(presented_key(&h), None);

        h.insert("x-admin-key", HeaderValue::from_static("other"));
        assert_eq!(presented_key(&h).as_deref(), Some("other"));
    }
}
