//! Opaque tokens: refresh sessions, email verification and password reset.
//!
//! Raw values leave the process exactly once (cookie or email). Only the
//! SHA-256 hex digest is stored, so a database read never yields a usable token.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;

pub const VERIFICATION_TTL_HOURS: i64 = 24;
pub const RESET_TTL_MINUTES: i64 = 10;
const TOKEN_BYTES: usize = 32;

/// 32 random bytes, hex encoded.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hash_token(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// A single-use token: the raw value to deliver and the hash to store.
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub raw: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

impl OneTimeToken {
    pub fn generate(ttl: Duration) -> Self {
        let raw = random_token();
        let hash = hash_token(&raw);
        Self {
            raw,
            hash,
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn verification() -> Self {
        Self::generate(Duration::hours(VERIFICATION_TTL_HOURS))
    }

    pub fn password_reset() -> Self {
        Self::generate(Duration::minutes(RESET_TTL_MINUTES))
    }
}

/// Runs `deliver`; if it fails, runs `rollback` and returns the delivery error.
/// Keeps a stored token from outliving a notification that never went out.
pub async fn deliver_or_rollback<D, R>(deliver: D, rollback: R) -> Result<(), AppError>
where
    D: Future<Output = Result<(), AppError>>,
    R: Future<Output = Result<(), AppError>>,
{
    match deliver.await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!("Token delivery failed; rolling back the stored token");
            if let Err(rollback_err) = rollback.await {
                tracing::error!("Token rollback failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Refresh token store
// ────────────────────────────────────────────────────────────────────────────

/// Persistence for refresh sessions. Carried in `AppState` as
/// `Arc<dyn RefreshTokenStore>`.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Atomically deletes an unexpired record and returns its owner.
    async fn consume(&self, token_hash: &str) -> Result<Option<Uuid>, AppError>;

    async fn delete(&self, token_hash: &str) -> Result<u64, AppError>;

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    async fn purge_expired_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    async fn purge_expired(&self) -> Result<u64, AppError>;
}

pub struct PgRefreshTokenStore {
    db: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn consume(&self, token_hash: &str) -> Result<Option<Uuid>, AppError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "DELETE FROM refresh_tokens
             WHERE token_hash = $1 AND expires_at > now()
             RETURNING user_id",
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    async fn delete(&self, token_hash: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at <= now()")
                .bind(user_id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session operations
// ────────────────────────────────────────────────────────────────────────────

/// Stores a new refresh session and returns the raw token for the cookie.
pub async fn issue_refresh(
    store: &dyn RefreshTokenStore,
    user_id: Uuid,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let raw = random_token();
    store
        .insert(user_id, &hash_token(&raw), Utc::now() + Duration::seconds(ttl_secs))
        .await?;
    debug!(user_id = %user_id, "refresh session issued");
    Ok(raw)
}

/// Consumes `raw`, runs `authorize` for its owner and only then issues the
/// successor, so a failed authorization leaves no live session behind. A
/// missing, expired or already used token is `Unauthorized`.
pub async fn rotate_refresh<T, F, Fut>(
    store: &dyn RefreshTokenStore,
    raw: &str,
    ttl_secs: i64,
    authorize: F,
) -> Result<(T, String), AppError>
where
    F: FnOnce(Uuid) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let user_id = store.consume(&hash_token(raw)).await?.ok_or_else(|| {
        warn!("Refresh token rejected: unknown, expired or already used");
        AppError::Unauthorized("Invalid refresh token".to_string())
    })?;
    let authorized = authorize(user_id).await?;
    let successor = issue_refresh(store, user_id, ttl_secs).await?;
    Ok((authorized, successor))
}

/// Best-effort removal; failures are logged and swallowed.
pub async fn revoke_refresh(store: &dyn RefreshTokenStore, raw: &str) {
    if let Err(e) = store.delete(&hash_token(raw)).await {
        warn!("Failed to delete refresh token on logout: {e}");
    }
}

/// Deletes every expired refresh session on a fixed interval.
pub fn spawn_sweeper(
    store: std::sync::Arc<dyn RefreshTokenStore>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Swept {n} expired refresh tokens"),
                Err(e) => warn!("Refresh token sweep failed: {e}"),
            }
        }
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryRefreshStore {
        rows: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
    }

    impl MemoryRefreshStore {
        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RefreshTokenStore for MemoryRefreshStore {
        async fn insert(
            &self,
            user_id: Uuid,
            token_hash: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<(), AppError> {
            self.rows
                .lock()
                .unwrap()
                .insert(token_hash.to_string(), (user_id, expires_at));
            Ok(())
        }

        async fn consume(&self, token_hash: &str) -> Result<Option<Uuid>, AppError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get(token_hash) {
                Some((_, expires_at)) if *expires_at > Utc::now() => {
                    Ok(rows.remove(token_hash).map(|(user_id, _)| user_id))
                }
                _ => Ok(None),
            }
        }

        async fn delete(&self, token_hash: &str) -> Result<u64, AppError> {
            Ok(self.rows.lock().unwrap().remove(token_hash).map_or(0, |_| 1))
        }

        async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, (owner, _)| *owner != user_id);
            Ok((before - rows.len()) as u64)
        }

        async fn purge_expired_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
            let now = Utc::now();
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, (owner, expires_at)| *owner != user_id || *expires_at > now);
            Ok((before - rows.len()) as u64)
        }

        async fn purge_expired(&self) -> Result<u64, AppError> {
            let now = Utc::now();
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, (_, expires_at)| *expires_at > now);
            Ok((before - rows.len()) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::memory::MemoryRefreshStore;
    use super::*;

    async fn owner(user_id: Uuid) -> Result<Uuid, AppError> {
        Ok(user_id)
    }

    #[test]
    fn test_random_token_shape() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable_and_not_the_raw_value() {
        let raw = "abc";
        assert_eq!(hash_token(raw), hash_token(raw));
        assert_eq!(
            hash_token(raw),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_one_time_token_windows() {
        let verification = OneTimeToken::verification();
        let reset = OneTimeToken::password_reset();
        assert_eq!(verification.hash, hash_token(&verification.raw));
        let reset_window = reset.expires_at - Utc::now();
        assert!(reset_window <= Duration::minutes(RESET_TTL_MINUTES));
        assert!(reset_window > Duration::minutes(RESET_TTL_MINUTES - 1));
        assert!(verification.expires_at - Utc::now() > Duration::hours(23));
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let store = MemoryRefreshStore::default();
        let user_id = Uuid::new_v4();
        let first = issue_refresh(&store, user_id, 3600).await.unwrap();

        let (claimed, second) = rotate_refresh(&store, &first, 3600, owner).await.unwrap();
        assert_eq!(claimed, user_id);
        assert_ne!(first, second);

        let replay = rotate_refresh(&store, &first, 3600, owner).await;
        assert!(matches!(replay, Err(AppError::Unauthorized(_))));

        assert!(rotate_refresh(&store, &second, 3600, owner).await.is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_rejected_and_swept() {
        let store = MemoryRefreshStore::default();
        let user_id = Uuid::new_v4();
        let stale = issue_refresh(&store, user_id, -10).await.unwrap();
        issue_refresh(&store, user_id, 3600).await.unwrap();

        assert!(rotate_refresh(&store, &stale, 3600, owner).await.is_err());
        assert_eq!(store.purge_expired_for_user(user_id).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_authorization_issues_no_successor() {
        let store = MemoryRefreshStore::default();
        let raw = issue_refresh(&store, Uuid::new_v4(), 3600).await.unwrap();

        let result = rotate_refresh(&store, &raw, 3600, |_| async {
            Err::<(), _>(AppError::Unauthorized("User not found".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_revoke_removes_session() {
        let store = MemoryRefreshStore::default();
        let raw = issue_refresh(&store, Uuid::new_v4(), 3600).await.unwrap();
        revoke_refresh(&store, &raw).await;
        revoke_refresh(&store, "never-issued").await;
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_rolls_back() {
        let rolled_back = AtomicBool::new(false);
        let result = deliver_or_rollback(
            async { Err::<(), _>(AppError::Mail("smtp down".into())) },
            async {
                rolled_back.store(true, Ordering::SeqCst);
                Ok::<(), AppError>(())
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Mail(_))));
        assert!(rolled_back.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_delivery_keeps_token() {
        let rolled_back = AtomicBool::new(false);
        deliver_or_rollback(async { Ok::<(), AppError>(()) }, async {
            rolled_back.store(true, Ordering::SeqCst);
            Ok::<(), AppError>(())
        })
        .await
        .unwrap();
        assert!(!rolled_back.load(Ordering::SeqCst));
    }
}
