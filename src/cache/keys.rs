//! Request fingerprints for the response cache.
//!
//! A key is `METHOD|request-uri|host|sha256(authorization|accept|accept-encoding|accept-language)`.
//! HEAD folds into GET so both share one representation. Two requests that
//! may receive different representations (other credential, other negotiated
//! content) always land on different keys.

use axum::http::{
    HeaderMap, Method,
    header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, AUTHORIZATION, HeaderName},
};
use sha2::{Digest, Sha256};

const NEGOTIATION_HEADERS: [HeaderName; 4] =
    [AUTHORIZATION, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE];

/// Build the cache key for a request.
pub fn fingerprint(method: &Method, request_uri: &str, host: &str, headers: &HeaderMap) -> String {
    let method = if method == Method::HEAD {
        Method::GET.as_str()
    } else {
        method.as_str()
    };

    let negotiation = hash_negotiation_headers(headers);
    [method, request_uri, host, negotiation.as_str()].join("|")
}

/// Hex SHA-256 over the trimmed negotiation header values.
pub fn hash_negotiation_headers(headers: &HeaderMap) -> String {
    let joined = NEGOTIATION_HEADERS
        .iter()
        .map(|name| trimmed_header(headers, name))
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize().to_vec())
}

fn trimmed_header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}
