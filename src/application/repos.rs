//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::accounts::{AccountStanding, ResolvedIdentity, UserRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read-only projections of the `app_user` table.
///
/// `Ok(None)` means the query ran and matched nothing; `Err` means the
/// datastore could not answer. Callers must keep the two apart.
#[async_trait]
pub trait AccountsRepo: Send + Sync {
    /// `token → (email, role)`.
    async fn find_identity_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ResolvedIdentity>, RepoError>;

    /// `email → (role, banned_till)`. Row presence doubles as the existence check.
    async fn find_standing_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountStanding>, RepoError>;

    /// `email → (id, email, role)`, used by downstream services.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;
}
