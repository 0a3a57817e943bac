use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::application::repos::{AccountsRepo, RepoError};
use crate::domain::accounts::{AccountStanding, ResolvedIdentity};

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("account `{email}` does not exist")]
    AccountNotFound { email: String },
    #[error("account `{email}` is banned until {till}")]
    AccountBanned { email: String, till: OffsetDateTime },
    #[error("account lookup failed: {0}")]
    Datastore(#[source] RepoError),
}

/// Existence check, then ban check, against the live account row.
///
/// Never cached: a ban must take effect on the very next request.
#[derive(Clone)]
pub struct AuthorizationGate {
    accounts: Arc<dyn AccountsRepo>,
}

impl AuthorizationGate {
    pub fn new(accounts: Arc<dyn AccountsRepo>) -> Self {
        Self { accounts }
    }

    pub async fn authorize(
        &self,
        identity: &ResolvedIdentity,
    ) -> Result<AccountStanding, AuthorizationError> {
        self.authorize_at(identity, OffsetDateTime::now_utc()).await
    }

    pub async fn authorize_at(
        &self,
        identity: &ResolvedIdentity,
        now: OffsetDateTime,
    ) -> Result<AccountStanding, AuthorizationError> {
        let standing = match self.accounts.find_standing_by_email(&identity.email).await {
            Ok(Some(standing)) => standing,
            Ok(None) => {
                info!(
                    target = "tollgate::authorization",
                    email = %identity.email,
                    outcome = "not_found",
                    "account does not exist"
                );
                return Err(AuthorizationError::AccountNotFound {
                    email: identity.email.clone(),
                });
            }
            Err(err) => {
                error!(
                    target = "tollgate::authorization",
                    email = %identity.email,
                    error = %err,
                    "account lookup failed"
                );
                return Err(AuthorizationError::Datastore(err));
            }
        };

        if let Some(till) = standing.banned_till.filter(|_| standing.is_banned_at(now)) {
            info!(
                target = "tollgate::authorization",
                email = %identity.email,
                outcome = "banned",
                banned_till = %till,
                "account is banned"
            );
            return Err(AuthorizationError::AccountBanned {
                email: identity.email.clone(),
                till,
            });
        }

        Ok(standing)
    }
}
