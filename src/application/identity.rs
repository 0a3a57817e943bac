//! Bearer credential → trusted identity.
//!
//! The resolver consults the identity cache first and only falls back to the
//! datastore (or the external identity provider) on a miss. Successful
//! resolutions are cached for the configured TTL; failures never are.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::repos::{AccountsRepo, RepoError};
use crate::cache::IdentityStore;
use crate::domain::accounts::ResolvedIdentity;

pub const DEFAULT_QUERY_PARAM: &str = "token";
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing bearer credential")]
    CredentialMissing,
    #[error("credential does not map to any account")]
    CredentialInvalid,
    #[error("identity provider rejected credential: {0}")]
    ProviderRejected(#[source] ProviderError),
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(#[source] ProviderError),
    #[error("identity lookup failed: {0}")]
    Datastore(#[source] RepoError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider answered with status {0}")]
    Status(u16),
    #[error("malformed provider payload: {0}")]
    Malformed(String),
    #[error("provider payload carries no email")]
    MissingEmail,
    #[error("provider request timed out")]
    Timeout,
    #[error("provider request failed: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Infrastructure failure rather than a verdict on the credential.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

/// External service that maps a bearer token to an email.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, ProviderError>;
}

/// Where a cache miss is resolved.
#[derive(Clone)]
pub enum IdentityBackend {
    /// `token → (email, role)` lookup in `app_user`.
    Datastore(Arc<dyn AccountsRepo>),
    /// External provider verification; only the email is asserted.
    Provider(Arc<dyn IdentityProvider>),
}

#[derive(Clone)]
pub struct IdentityResolver {
    backend: IdentityBackend,
    cache: Arc<IdentityStore>,
}

impl IdentityResolver {
    pub fn new(backend: IdentityBackend, cache: Arc<IdentityStore>) -> Self {
        Self { backend, cache }
    }

    pub async fn resolve(&self, credential: &str) -> Result<ResolvedIdentity, IdentityError> {
        if credential.is_empty() {
            return Err(IdentityError::CredentialMissing);
        }

        if let Some(identity) = self.cache.get(credential) {
            debug!(
                target = "tollgate::identity",
                cache = "identity",
                outcome = "hit",
                "identity served from cache"
            );
            return Ok(identity);
        }

        let identity = match &self.backend {
            IdentityBackend::Datastore(accounts) => {
                resolve_from_datastore(accounts.as_ref(), credential).await?
            }
            IdentityBackend::Provider(provider) => {
                resolve_from_provider(provider.as_ref(), credential).await?
            }
        };

        self.cache.insert(credential, identity.clone());
        Ok(identity)
    }
}

async fn resolve_from_datastore(
    accounts: &dyn AccountsRepo,
    token: &str,
) -> Result<ResolvedIdentity, IdentityError> {
    match accounts.find_identity_by_token(token).await {
        Ok(Some(identity)) if !identity.email.is_empty() && identity.has_role() => Ok(identity),
        Ok(_) => {
            info!(
                target = "tollgate::identity",
                outcome = "no_match",
                "credential matched no account"
            );
            Err(IdentityError::CredentialInvalid)
        }
        Err(err) => {
            error!(
                target = "tollgate::identity",
                outcome = "datastore_error",
                error = %err,
                "identity lookup failed"
            );
            Err(IdentityError::Datastore(err))
        }
    }
}

async fn resolve_from_provider(
    provider: &dyn IdentityProvider,
    token: &str,
) -> Result<ResolvedIdentity, IdentityError> {
    match provider.verify(token).await {
        Ok(email) if !email.trim().is_empty() => Ok(ResolvedIdentity::new(email.trim(), "")),
        Ok(_) => Err(IdentityError::ProviderRejected(ProviderError::MissingEmail)),
        Err(err) if err.is_unavailable() => {
            warn!(
                target = "tollgate::identity",
                outcome = "provider_unavailable",
                error = %err,
                "identity provider call failed"
            );
            Err(IdentityError::ProviderUnavailable(err))
        }
        Err(err) => {
            info!(
                target = "tollgate::identity",
                outcome = "provider_rejected",
                error = %err,
                "identity provider rejected credential"
            );
            Err(IdentityError::ProviderRejected(err))
        }
    }
}

/// Pull the bearer credential from the request.
///
/// `Authorization: Bearer <token>` wins; surrounding quotes are stripped. The
/// query parameter is the fallback for clients that cannot set headers.
pub fn extract_credential(
    headers: &HeaderMap,
    query: Option<&str>,
    query_param: &str,
) -> Result<String, IdentityError> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().strip_prefix(BEARER_PREFIX))
        .map(clean_token)
        .filter(|token| !token.is_empty());

    if let Some(token) = from_header {
        return Ok(token);
    }

    query
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == query_param)
                .map(|(_, value)| clean_token(&value))
        })
        .filter(|token| !token.is_empty())
        .ok_or(IdentityError::CredentialMissing)
}

fn clean_token(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}
