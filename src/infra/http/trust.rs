//! Downstream side of the identity handoff.
//!
//! Internal services mount [`trusted_user`] to turn the gateway-asserted
//! `X-Auth-Email` header into a full user record. The header is only
//! meaningful when the service is reachable exclusively through the gateway;
//! a configured shared secret makes that check explicit.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::application::{error::HttpError, repos::AccountsRepo};
use crate::domain::accounts::UserRecord;

use super::{AUTH_EMAIL_HEADER, GATEWAY_SECRET_HEADER};

const SOURCE: &str = "infra::http::trust";

#[derive(Clone)]
pub struct TrustState {
    accounts: Arc<dyn AccountsRepo>,
    shared_secret: Option<Arc<str>>,
}

impl TrustState {
    pub fn new(accounts: Arc<dyn AccountsRepo>, shared_secret: Option<&str>) -> Self {
        Self {
            accounts,
            shared_secret: shared_secret.map(Arc::from),
        }
    }
}

/// The caller, as asserted by the gateway and re-read from the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustedUser(pub UserRecord);

impl<S> FromRequestParts<S> for TrustedUser
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TrustedUser>()
            .cloned()
            .ok_or_else(|| {
                HttpError::new(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                    "TrustedUser extracted without the trusted_user middleware",
                )
            })
    }
}

pub async fn trusted_user(
    State(state): State<TrustState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = state.shared_secret.as_deref() {
        if !secret_matches(request.headers(), expected) {
            warn!(
                target = "tollgate::http::trust",
                "request did not carry the gateway secret"
            );
            return HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "missing user identity",
                "gateway secret missing or mismatched",
            )
            .into_response();
        }
    }

    let email = request
        .headers()
        .get(AUTH_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if email.is_empty() {
        return HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "missing user identity",
            "X-Auth-Email header absent",
        )
        .into_response();
    }

    let user = match state.accounts.find_user_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "user not found",
                format!("no account for `{email}`"),
            )
            .into_response();
        }
        Err(err) => {
            error!(
                target = "tollgate::http::trust",
                email = %email,
                error = %err,
                "user lookup failed"
            );
            return HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                &err,
            )
            .into_response();
        }
    };

    request.extensions_mut().insert(TrustedUser(user));
    next.run(request).await
}

fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(GATEWAY_SECRET_HEADER)
        .map(|value| bool::from(value.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::application::repos::RepoError;
    use crate::domain::accounts::{AccountStanding, ResolvedIdentity};

    struct Directory {
        fail: bool,
    }

    #[async_trait]
    impl AccountsRepo for Directory {
        async fn find_identity_by_token(
            &self,
            _token: &str,
        ) -> Result<Option<ResolvedIdentity>, RepoError> {
            Ok(None)
        }

        async fn find_standing_by_email(
            &self,
            _email: &str,
        ) -> Result<Option<AccountStanding>, RepoError> {
            Ok(None)
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
            if self.fail {
                return Err(RepoError::from_persistence("connection refused"));
            }
            Ok((email == "alice@example.com").then(|| UserRecord {
                id: 7,
                email: email.to_string(),
                role: "admin".to_string(),
            }))
        }
    }

    async fn whoami(TrustedUser(user): TrustedUser) -> Json<UserRecord> {
        Json(user)
    }

    fn service(secret: Option<&str>, fail: bool) -> Router {
        let state = TrustState::new(Arc::new(Directory { fail }), secret);
        Router::new()
            .route("/me", get(whoami))
            .layer(from_fn_with_state(state, trusted_user))
    }

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/me");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn known_email_yields_user_record() {
        let response = service(None, false)
            .oneshot(request(&[(AUTH_EMAIL_HEADER, "alice@example.com")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let user: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(user["id"], 7);
        assert_eq!(user["role"], "admin");
    }

    #[tokio::test]
    async fn missing_or_unknown_email_is_unauthorized() {
        let missing = service(None, false).oneshot(request(&[])).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let unknown = service(None, false)
            .oneshot(request(&[(AUTH_EMAIL_HEADER, "mallory@example.com")]))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn datastore_failure_is_internal_error() {
        let response = service(None, true)
            .oneshot(request(&[(AUTH_EMAIL_HEADER, "alice@example.com")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn configured_secret_is_enforced() {
        let without = service(Some("s3cret"), false)
            .oneshot(request(&[(AUTH_EMAIL_HEADER, "alice@example.com")]))
            .await
            .unwrap();
        assert_eq!(without.status(), StatusCode::UNAUTHORIZED);

        let wrong = service(Some("s3cret"), false)
            .oneshot(request(&[
                (AUTH_EMAIL_HEADER, "alice@example.com"),
                (GATEWAY_SECRET_HEADER, "guess"),
            ]))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let right = service(Some("s3cret"), false)
            .oneshot(request(&[
                (AUTH_EMAIL_HEADER, "alice@example.com"),
                (GATEWAY_SECRET_HEADER, "s3cret"),
            ]))
            .await
            .unwrap();
        assert_eq!(right.status(), StatusCode::OK);
    }
}
