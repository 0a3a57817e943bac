//! Identity and account-standing guards for protected route groups.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;

use crate::application::{
    authorization::{AuthorizationError, AuthorizationGate},
    error::HttpError,
    identity::{IdentityError, IdentityResolver, extract_credential},
};
use crate::domain::accounts::ResolvedIdentity;

use super::{AUTH_EMAIL_HEADER, AUTH_ROLE_HEADER};

const SOURCE: &str = "infra::http::guard";

#[derive(Clone)]
pub struct GuardState {
    resolver: IdentityResolver,
    gate: AuthorizationGate,
    query_param: Arc<str>,
}

impl GuardState {
    pub fn new(resolver: IdentityResolver, gate: AuthorizationGate, query_param: &str) -> Self {
        Self {
            resolver,
            gate,
            query_param: Arc::from(query_param),
        }
    }
}

/// Drop identity headers a client may have forged. Runs on every route,
/// guarded or not.
pub async fn strip_identity_headers(mut request: Request<Body>, next: Next) -> Response {
    clear_identity_headers(request.headers_mut());
    next.run(request).await
}

/// Resolve the bearer credential and attach the identity to the request.
pub async fn resolve_identity(
    State(guard): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let credential = match extract_credential(
        request.headers(),
        request.uri().query(),
        &guard.query_param,
    ) {
        Ok(credential) => credential,
        Err(err) => return identity_rejection(err),
    };

    let identity = match guard.resolver.resolve(&credential).await {
        Ok(identity) => identity,
        Err(err) => return identity_rejection(err),
    };

    let (Ok(bearer), Ok(email)) = (
        HeaderValue::from_str(&format!("Bearer {credential}")),
        HeaderValue::from_str(&identity.email),
    ) else {
        return identity_rejection(IdentityError::CredentialInvalid);
    };

    let headers = request.headers_mut();
    clear_identity_headers(headers);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(AUTH_EMAIL_HEADER, email);
    if identity.has_role() {
        if let Ok(role) = HeaderValue::from_str(&identity.role) {
            headers.insert(AUTH_ROLE_HEADER, role);
        }
    }

    request.extensions_mut().insert(identity.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(identity);
    response
}

/// Existence and ban check against the live account row.
pub async fn authorize_account(
    State(guard): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(mut identity) = request.extensions().get::<ResolvedIdentity>().cloned() else {
        return HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error",
            "authorization ran without a resolved identity",
        )
        .into_response();
    };

    let standing = match guard.gate.authorize(&identity).await {
        Ok(standing) => standing,
        Err(err) => return authorization_rejection(err),
    };

    if !identity.has_role() && !standing.role.is_empty() {
        if let Ok(role) = HeaderValue::from_str(&standing.role) {
            request.headers_mut().insert(AUTH_ROLE_HEADER, role);
        }
        identity.role = standing.role;
        request.extensions_mut().insert(identity);
    }

    next.run(request).await
}

fn clear_identity_headers(headers: &mut HeaderMap) {
    headers.remove(AUTH_EMAIL_HEADER);
    headers.remove(AUTH_ROLE_HEADER);
}

fn identity_rejection(err: IdentityError) -> Response {
    let (status, message, reason) = match &err {
        IdentityError::CredentialMissing => (
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
            "missing_credential",
        ),
        IdentityError::CredentialInvalid | IdentityError::ProviderRejected(_) => (
            StatusCode::UNAUTHORIZED,
            "Invalid token",
            "invalid_credential",
        ),
        IdentityError::ProviderUnavailable(_) => (
            StatusCode::UNAUTHORIZED,
            "Failed to verify token",
            "provider_unavailable",
        ),
        IdentityError::Datastore(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error",
            "datastore_error",
        ),
    };
    counter!("tollgate_auth_rejected_total", "reason" => reason).increment(1);
    HttpError::from_error(SOURCE, status, message, &err).into_response()
}

fn authorization_rejection(err: AuthorizationError) -> Response {
    let (status, message, reason) = match &err {
        AuthorizationError::AccountNotFound { .. } => (
            StatusCode::UNAUTHORIZED,
            "User does not exist",
            "account_not_found",
        ),
        AuthorizationError::AccountBanned { .. } => {
            (StatusCode::FORBIDDEN, "User is banned", "account_banned")
        }
        AuthorizationError::Datastore(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error",
            "datastore_error",
        ),
    };
    counter!("tollgate_auth_rejected_total", "reason" => reason).increment(1);
    HttpError::from_error(SOURCE, status, message, &err).into_response()
}
