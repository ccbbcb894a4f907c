use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

/// Account tier. Stored as `users.role` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Free,
    Paid,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Free => "free",
            Role::Paid => "paid",
        }
    }

    /// Unknown values are treated as the unprivileged tier.
    pub fn parse(value: &str) -> Self {
        match value {
            "paid" => Role::Paid,
            _ => Role::Free,
        }
    }

    pub fn is_metered(&self) -> bool {
        matches!(self, Role::Free)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub email_verified: bool,
    pub analysis_quota: i32,
    pub last_quota_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, email_verified, \
     analysis_quota, last_quota_reset, created_at, updated_at";

/// Client-facing projection. Never carries the hash or any token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
}

impl From<&UserRow> for PublicUser {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            email: row.email.clone(),
            role: row.role(),
            email_verified: row.email_verified,
        }
    }
}

/// Fields for a fresh account. The verification token is already hashed.
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub verification_token_hash: &'a str,
    pub verification_expires: DateTime<Utc>,
}

/// Newest first; the id breaks `updated_at` ties so the pick is stable.
fn find_by_email_sql() -> String {
    format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE lower(email) = lower($1)
         ORDER BY updated_at DESC, id DESC
         LIMIT 2"
    )
}

impl UserRow {
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Case-insensitive lookup. When legacy rows share an email the most
    /// recently updated one wins.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
        let mut rows = sqlx::query_as::<_, UserRow>(&find_by_email_sql())
            .bind(email)
            .fetch_all(db)
            .await?;

        if rows.len() > 1 {
            warn!(user_id = %rows[0].id, "Multiple accounts share one email; using the most recently updated");
        }
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// True when `email` belongs to an account other than `except`.
    pub async fn email_taken(
        db: &PgPool,
        email: &str,
        except: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        let (taken,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM users
                WHERE lower(email) = lower($1) AND ($2::uuid IS NULL OR id <> $2)
             )",
        )
        .bind(email)
        .bind(except)
        .fetch_one(db)
        .await?;
        Ok(taken)
    }

    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<UserRow, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users
                (name, email, password_hash, email_verification_token, email_verification_expires)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(new.name)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.verification_token_hash)
        .bind(new.verification_expires)
        .fetch_one(db)
        .await
    }

    // ── Email verification ────────────────────────────────────────────────

    pub async fn set_verification_token(
        db: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users
             SET email_verification_token = $2, email_verification_expires = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Marks the matching account verified and clears the token pair.
    /// `None` when the hash is unknown or expired.
    pub async fn verify_email(db: &PgPool, token_hash: &str) -> Result<Option<Uuid>, sqlx::Error> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE users
             SET email_verified = TRUE,
                 email_verification_token = NULL,
                 email_verification_expires = NULL,
                 updated_at = now()
             WHERE email_verification_token = $1 AND email_verification_expires > now()
             RETURNING id",
        )
        .bind(token_hash)
        .fetch_optional(db)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    // ── Password reset ────────────────────────────────────────────────────

    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users
             SET password_reset_token = $2, password_reset_expires = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_token(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users
             SET password_reset_token = NULL, password_reset_expires = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Consumes a reset token: sets the new hash and clears the token pair in
    /// one statement. `None` when the hash is unknown or expired.
    pub async fn reset_password(
        db: &PgPool,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET password_hash = $2,
                 password_reset_token = NULL,
                 password_reset_expires = NULL,
                 updated_at = now()
             WHERE password_reset_token = $1 AND password_reset_expires > now()
             RETURNING {USER_COLUMNS}"
        ))
        .bind(token_hash)
        .bind(password_hash)
        .fetch_optional(db)
        .await
    }

    // ── Profile ───────────────────────────────────────────────────────────

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<UserRow, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET name = $2, email = $3, updated_at = now()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(db)
        .await
    }

    pub async fn update_password(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }
}

/// True for a Postgres unique-constraint violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
