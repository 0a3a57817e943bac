//! Forwarding to internal services.
//!
//! Requests arrive here with the route prefix already stripped. The path and
//! query are appended to the upstream base; the body is buffered both ways.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, warn};
use url::Url;

use crate::application::error::HttpError;
use crate::infra::error::InfraError;

use super::GATEWAY_SECRET_HEADER;

const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Clone)]
pub struct Upstream {
    inner: Arc<UpstreamInner>,
}

struct UpstreamInner {
    name: String,
    base: Url,
    client: reqwest::Client,
    timeout: Duration,
    shared_secret: Option<HeaderValue>,
}

impl Upstream {
    pub fn new(
        name: impl Into<String>,
        base: Url,
        client: reqwest::Client,
        timeout: Duration,
        shared_secret: Option<&str>,
    ) -> Result<Self, InfraError> {
        let shared_secret = shared_secret
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|err| {
                InfraError::configuration(format!(
                    "gateway.shared_secret is not a header value: {err}"
                ))
            })?;

        Ok(Self {
            inner: Arc::new(UpstreamInner {
                name: name.into(),
                base,
                client,
                timeout,
                shared_secret,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Upstream base path joined with the stripped request path, plus the query.
    fn target_url(&self, uri: &Uri) -> Url {
        let mut target = self.inner.base.clone();
        let base_path = target.path().trim_end_matches('/').to_string();
        let request_path = uri.path();
        let request_path = if request_path.starts_with('/') {
            request_path.to_string()
        } else {
            format!("/{request_path}")
        };
        target.set_path(&format!("{base_path}{request_path}"));
        target.set_query(uri.query());
        target
    }
}

/// Fallback handler for every route group.
pub async fn forward(State(upstream): State<Upstream>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let target = upstream.target_url(&parts.uri);

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return HttpError::new(
                "infra::http::proxy",
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                format!("failed to buffer request body: {err}"),
            )
            .into_response();
        }
    };

    let mut headers = forwardable_headers(&parts.headers);
    headers.remove(GATEWAY_SECRET_HEADER);
    if let Some(secret) = upstream.inner.shared_secret.as_ref() {
        headers.insert(GATEWAY_SECRET_HEADER, secret.clone());
    }
    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        append_forwarded_for(&mut headers, *peer);
    }

    debug!(
        target = "tollgate::http::proxy",
        upstream = upstream.name(),
        method = %parts.method,
        url = %target,
        "forwarding request"
    );

    let result = upstream
        .inner
        .client
        .request(parts.method.clone(), target.clone())
        .headers(headers)
        .body(body)
        .timeout(upstream.inner.timeout)
        .send()
        .await;

    let upstream_response = match result {
        Ok(response) => response,
        Err(err) => return transport_failure(&upstream, &target, err),
    };

    let status = upstream_response.status();
    let response_headers = forwardable_headers(upstream_response.headers());
    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return transport_failure(&upstream, &target, err),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

fn transport_failure(upstream: &Upstream, target: &Url, err: reqwest::Error) -> Response {
    counter!("tollgate_upstream_error_total", "upstream" => upstream.name().to_string())
        .increment(1);
    warn!(
        target = "tollgate::http::proxy",
        upstream = upstream.name(),
        url = %target,
        timeout = err.is_timeout(),
        error = %err,
        "upstream request failed"
    );

    let (status, message) = if err.is_timeout() {
        (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
    } else {
        (StatusCode::BAD_GATEWAY, "Upstream unavailable")
    };
    HttpError::from_error("infra::http::proxy", status, message, &err).into_response()
}

/// Copy end-to-end headers only.
///
/// Drops the fixed hop-by-hop set, `Host`, and anything the `Connection`
/// header names.
fn forwardable_headers(source: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = source
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source.iter() {
        let lowered = name.as_str();
        if is_hop_by_hop_header(lowered) || connection_listed.iter().any(|n| n == lowered) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(&FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.trim().is_empty() => format!("{prior}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(base: &str) -> Upstream {
        Upstream::new(
            "comm",
            Url::parse(base).expect("url"),
            reqwest::Client::new(),
            Duration::from_secs(1),
            None,
        )
        .expect("upstream")
    }

    #[test]
    fn target_appends_stripped_path_and_query() {
        let comm = upstream("http://comm:8002");
        let target = comm.target_url(&Uri::from_static("/messages?page=2"));
        assert_eq!(target.as_str(), "http://comm:8002/messages?page=2");

        let target = comm.target_url(&Uri::from_static("/"));
        assert_eq!(target.as_str(), "http://comm:8002/");

        let nested = upstream("http://comm:8002/api/");
        let target = nested.target_url(&Uri::from_static("/messages"));
        assert_eq!(target.as_str(), "http://comm:8002/api/messages");
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut source = HeaderMap::new();
        let connection = HeaderValue::from_static("keep-alive, x-trace");
        source.insert(header::CONNECTION, connection);
        source.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        source.insert("x-trace", HeaderValue::from_static("1"));
        source.insert(header::HOST, HeaderValue::from_static("gateway"));
        let json = HeaderValue::from_static("application/json");
        source.insert(header::CONTENT_TYPE, json);
        source.append("set-cookie", HeaderValue::from_static("a=1"));
        source.append("set-cookie", HeaderValue::from_static("b=2"));

        let forwarded = forwardable_headers(&source);
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert!(forwarded.get("keep-alive").is_none());
        assert!(forwarded.get("x-trace").is_none());
        assert!(forwarded.get(header::HOST).is_none());
        assert_eq!(forwarded[header::CONTENT_TYPE], "application/json");
        assert_eq!(forwarded.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1:5000".parse().expect("addr"));
        assert_eq!(headers[&FORWARDED_FOR], "10.0.0.1");

        append_forwarded_for(&mut headers, "10.0.0.2:5000".parse().expect("addr"));
        assert_eq!(headers[&FORWARDED_FOR], "10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn invalid_shared_secret_is_a_configuration_error() {
        let result = Upstream::new(
            "comm",
            Url::parse("http://comm:8002").expect("url"),
            reqwest::Client::new(),
            Duration::from_secs(1),
            Some("bad\nsecret"),
        );
        assert!(matches!(result, Err(InfraError::Configuration { .. })));
    }
}
