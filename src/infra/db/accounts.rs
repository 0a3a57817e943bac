use sqlx::query_as;
use time::OffsetDateTime;

use crate::application::repos::{AccountsRepo, RepoError};
use crate::domain::accounts::{AccountStanding, ResolvedIdentity, UserRecord};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    email: String,
    role: String,
}

impl From<IdentityRow> for ResolvedIdentity {
    fn from(row: IdentityRow) -> Self {
        ResolvedIdentity::new(row.email, row.role)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StandingRow {
    role: String,
    banned_till: Option<OffsetDateTime>,
}

impl From<StandingRow> for AccountStanding {
    fn from(row: StandingRow) -> Self {
        AccountStanding {
            role: row.role,
            banned_till: row.banned_till,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    email: String,
    role: String,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord {
            id: row.id,
            email: row.email,
            role: row.role,
        }
    }
}

// `email` is citext and `role` is the `user_role` enum; both are cast to text
// so the rows decode without custom sqlx types.
#[async_trait::async_trait]
impl AccountsRepo for PostgresRepositories {
    async fn find_identity_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ResolvedIdentity>, RepoError> {
        let row = query_as::<_, IdentityRow>(
            r#"
            SELECT email::text AS email, role::text AS role
            FROM app_user
            WHERE token = $1
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ResolvedIdentity::from))
    }

    async fn find_standing_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountStanding>, RepoError> {
        let row = query_as::<_, StandingRow>(
            r#"
            SELECT role::text AS role, banned_till::timestamptz AS banned_till
            FROM app_user
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(AccountStanding::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        let row = query_as::<_, UserRow>(
            r#"
            SELECT id, email::text AS email, role::text AS role
            FROM app_user
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserRecord::from))
    }
}
