//! Account projections the gateway reads from the user datastore.
//!
//! The gateway never writes account rows. It only sees the `token → identity`
//! and `email → standing` projections of `app_user`.

use serde::Serialize;
use time::OffsetDateTime;

/// The `(email, role)` pair a bearer credential maps to.
///
/// Lives for one request. Only the credential → identity mapping is cached,
/// never the request-scoped value itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub email: String,
    /// Empty when the identity was asserted by the external provider, which
    /// only knows the email. The authorization gate fills it from the account row.
    pub role: String,
}

impl ResolvedIdentity {
    pub fn new(email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: role.into(),
        }
    }

    pub fn has_role(&self) -> bool {
        !self.role.is_empty()
    }
}

/// Ban and role state of an existing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStanding {
    pub role: String,
    pub banned_till: Option<OffsetDateTime>,
}

impl AccountStanding {
    /// A null or past `banned_till` passes; only a future one bans.
    pub fn is_banned_at(&self, now: OffsetDateTime) -> bool {
        self.banned_till.is_some_and(|till| till > now)
    }
}

/// User record re-resolved by downstream services from the trusted identity header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    pub role: String,
}
