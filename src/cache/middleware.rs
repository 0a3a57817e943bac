//! Response cache middleware.
//!
//! Wraps the innermost (proxy) handler of a route group. A hit short-circuits
//! the upstream call entirely; a miss records the upstream response before it
//! reaches the client.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{AGE, CACHE_CONTROL, CONNECTION, HOST, UPGRADE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::error::HttpError;

use super::{CacheConfig, ResponseStore, keys::fingerprint, store::CachedResponse};

/// Diagnostic header carrying `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

const STREAMING_SUFFIX: &str = "/ws";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct ResponseCacheState {
    pub config: CacheConfig,
    pub store: Arc<ResponseStore>,
}

impl ResponseCacheState {
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(ResponseStore::new(&config));
        Self { config, store }
    }
}

/// Middleware for response caching.
///
/// Only GET and HEAD requests are eligible. Upstream `no-store` is honoured;
/// any other upstream cache policy is replaced by the gateway's own.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enable_response_cache {
        return next.run(request).await;
    }

    if let Some(reason) = bypass_reason(&request) {
        counter!("tollgate_response_cache_bypass_total").increment(1);
        debug!(
            cache = "response",
            outcome = "bypass",
            reason,
            "request not cacheable"
        );
        return next.run(request).await;
    }

    let key = request_fingerprint(&request);
    let method = request.method().clone();

    if let Some(cached) = cache.store.lookup(&key) {
        counter!("tollgate_response_cache_hit_total").increment(1);
        debug!(
            cache = "response",
            outcome = "hit",
            "serving cached response"
        );
        return build_hit_response(cached, method == Method::HEAD);
    }

    counter!("tollgate_response_cache_miss_total").increment(1);
    debug!(
        cache = "response",
        outcome = "miss",
        "cache miss, forwarding upstream"
    );

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            // Nothing half-read is ever stored.
            warn!(cache = "response", error = %err, "upstream body aborted");
            return HttpError::new(
                "cache::middleware",
                StatusCode::BAD_GATEWAY,
                "Upstream response incomplete",
                format!("failed to buffer upstream body: {err}"),
            )
            .into_response();
        }
    };

    if declares_no_store(&parts.headers) {
        parts
            .headers
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        return Response::from_parts(parts, Body::from(bytes));
    }

    if let Ok(policy) = HeaderValue::from_str(&cache.config.cache_control()) {
        parts.headers.insert(CACHE_CONTROL, policy);
    }
    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));

    let storable = method == Method::GET
        && parts.status == StatusCode::OK
        && bytes.len() <= cache.config.response_max_body_bytes;

    if storable {
        let cached = CachedResponse::new(parts.status, parts.headers.clone(), bytes.clone());
        if let Some(evicted) = cache.store.store(key, cached) {
            debug!(cache = "response", evicted = %evicted, "evicted oldest entry");
        }
    } else {
        debug!(
            cache = "response",
            status = parts.status.as_u16(),
            body_bytes = bytes.len(),
            method = %method,
            "response delivered without storing"
        );
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Why a request must skip the cache entirely, if it must.
fn bypass_reason(request: &Request<Body>) -> Option<&'static str> {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return Some("method");
    }

    let headers = request.headers();
    if declares_no_store(headers) {
        return Some("no-store");
    }

    if request.uri().path().ends_with(STREAMING_SUFFIX)
        || header_eq_ignore_case(headers, CONNECTION.as_str(), "upgrade")
        || header_eq_ignore_case(headers, UPGRADE.as_str(), "websocket")
    {
        return Some("upgrade");
    }

    None
}

fn declares_no_store(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("no-store"))
}

fn header_eq_ignore_case(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case(expected))
}

/// Fingerprint the request as the client sent it, before prefix stripping.
fn request_fingerprint(request: &Request<Body>) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| request.uri());
    let request_uri = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("");

    fingerprint(request.method(), request_uri, host, request.headers())
}

/// Build a response from cached data.
fn build_hit_response(cached: CachedResponse, head: bool) -> Response {
    let age = cached.age_at(std::time::Instant::now()).as_secs();
    let body = if head {
        Body::empty()
    } else {
        Body::from(cached.body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;

    let headers = response.headers_mut();
    headers.insert(AGE, HeaderValue::from(age));
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    response
}
