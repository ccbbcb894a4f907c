//! Quota Tracker: monthly analysis allowance for free accounts.
//!
//! Check before the expensive call, decrement only after it succeeds. The
//! check/decrement pair is not atomic across concurrent requests; the
//! decrement is clamped at zero so the counter never goes negative.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::jwt::Principal;
use crate::errors::AppError;
use crate::models::user::{Role, UserRow};

pub const FREE_MONTHLY_ALLOWANCE: i32 = 5;
/// Shown as the usage limit for paid accounts; not enforced.
pub const PAID_USAGE_LIMIT: i32 = 20;

/// True when `now` falls in a later UTC calendar month than `last_reset`.
/// A clock that moves backwards never triggers a reset.
pub fn needs_reset(last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now.year(), now.month()) > (last_reset.year(), last_reset.month())
}

/// Remaining allowance as seen at `now`, applying a pending monthly reset.
pub fn effective_remaining(stored: i32, last_reset: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    if needs_reset(last_reset, now) {
        FREE_MONTHLY_ALLOWANCE
    } else {
        stored.max(0)
    }
}

/// The quota-relevant slice of a user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaAccount {
    pub role: Role,
    pub remaining: i32,
    pub last_reset: DateTime<Utc>,
}

impl From<&UserRow> for QuotaAccount {
    fn from(user: &UserRow) -> Self {
        Self {
            role: user.role(),
            remaining: user.analysis_quota,
            last_reset: user.last_quota_reset,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quota store
// ────────────────────────────────────────────────────────────────────────────

/// Persistence for the allowance counter. Carried in `AppState` as
/// `Arc<dyn QuotaStore>`.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn account(&self, user_id: Uuid) -> Result<Option<QuotaAccount>, AppError>;

    /// Restores the full allowance if the stored month is behind the current
    /// one and returns the counter afterwards. Concurrent callers see the
    /// same result; only the first one writes.
    async fn reset_if_stale(&self, user_id: Uuid) -> Result<i32, AppError>;

    /// Decrements the counter, clamped at zero.
    async fn charge(&self, user_id: Uuid) -> Result<(), AppError>;
}

pub struct PgQuotaStore {
    db: PgPool,
}

impl PgQuotaStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn account(&self, user_id: Uuid) -> Result<Option<QuotaAccount>, AppError> {
        let user = UserRow::find_by_id(&self.db, user_id).await?;
        Ok(user.as_ref().map(QuotaAccount::from))
    }

    async fn reset_if_stale(&self, user_id: Uuid) -> Result<i32, AppError> {
        let (remaining,): (i32,) = sqlx::query_as(
            "WITH reset AS (
                 UPDATE users
                 SET analysis_quota = $2, last_quota_reset = now(), updated_at = now()
                 WHERE id = $1
                   AND date_trunc('month', last_quota_reset AT TIME ZONE 'UTC')
                       < date_trunc('month', now() AT TIME ZONE 'UTC')
                 RETURNING analysis_quota
             )
             SELECT analysis_quota FROM reset
             UNION ALL
             SELECT analysis_quota FROM users WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM reset)",
        )
        .bind(user_id)
        .bind(FREE_MONTHLY_ALLOWANCE)
        .fetch_one(&self.db)
        .await?;
        Ok(remaining)
    }

    async fn charge(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users
             SET analysis_quota = GREATEST(analysis_quota - 1, 0), updated_at = now()
             WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gate
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of the pre-generation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaGate {
    /// Paid account; nothing to charge.
    Unmetered,
    /// Free account with allowance left; charge after success.
    Metered { user_id: Uuid },
}

/// Applies a pending monthly reset and fails with `QuotaExceeded` when the
/// allowance is spent. The stored tier decides; the tier in the token is
/// only compared against it, since an upgrade or downgrade lands before
/// the caller's access token is renewed.
pub async fn check_and_reserve(
    store: &dyn QuotaStore,
    principal: &Principal,
) -> Result<QuotaGate, AppError> {
    let user_id = principal.user_id;
    let account = store
        .account(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    if account.role != principal.role {
        debug!(
            user_id = %user_id,
            token_role = principal.role.as_str(),
            stored_role = account.role.as_str(),
            "tier changed since the access token was issued"
        );
    }

    if !account.role.is_metered() {
        return Ok(QuotaGate::Unmetered);
    }

    let remaining = if needs_reset(account.last_reset, Utc::now()) {
        let remaining = store.reset_if_stale(user_id).await?;
        info!(user_id = %user_id, "monthly quota reset");
        remaining
    } else {
        account.remaining
    };

    if remaining <= 0 {
        info!(user_id = %user_id, "analysis quota exhausted");
        return Err(AppError::QuotaExceeded);
    }

    debug!(user_id = %user_id, remaining, "quota check passed");
    Ok(QuotaGate::Metered { user_id })
}

/// Charges one analysis after a successful generation.
pub async fn commit(store: &dyn QuotaStore, gate: QuotaGate) -> Result<(), AppError> {
    if let QuotaGate::Metered { user_id } = gate {
        store.charge(user_id).await?;
    }
    Ok(())
}

/// Runs `work` against the caller's allowance. `work` is not polled unless
/// the gate passes, and the charge happens only when it returns `Ok`. A
/// failed charge is logged; the finished work is still returned.
pub async fn metered<T, F>(
    store: &dyn QuotaStore,
    principal: &Principal,
    work: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let gate = check_and_reserve(store, principal).await?;
    let value = work.await?;
    if let Err(e) = commit(store, gate).await {
        error!(user_id = %principal.user_id, "Failed to charge quota: {e}");
    }
    Ok(value)
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::memory::MemoryQuotaStore;
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn caller(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    fn account(role: Role, remaining: i32) -> QuotaAccount {
        QuotaAccount {
            role,
            remaining,
            last_reset: Utc::now(),
        }
    }

    #[test]
    fn test_same_month_does_not_reset() {
        assert!(!needs_reset(at(2025, 3, 1), at(2025, 3, 31)));
        assert_eq!(effective_remaining(2, at(2025, 3, 1), at(2025, 3, 31)), 2);
    }

    #[test]
    fn test_next_month_resets_to_allowance() {
        assert!(needs_reset(at(2025, 3, 31), at(2025, 4, 1)));
        assert_eq!(effective_remaining(0, at(2025, 3, 31), at(2025, 4, 1)), FREE_MONTHLY_ALLOWANCE);
    }

    #[test]
    fn test_year_boundary_resets() {
        assert!(needs_reset(at(2024, 12, 31), at(2025, 1, 1)));
        // Same month number, later year.
        assert!(needs_reset(at(2024, 5, 10), at(2025, 5, 10)));
    }

    #[test]
    fn test_clock_moving_backwards_never_resets() {
        assert!(!needs_reset(at(2025, 5, 1), at(2025, 4, 30)));
    }

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(effective_remaining(-3, at(2025, 3, 1), at(2025, 3, 2)), 0);
    }

    #[tokio::test]
    async fn test_exhausted_free_account_is_refused() {
        let me = caller(Role::Free);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Free, 0));

        let err = check_and_reserve(&store, &me).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));
    }

    #[tokio::test]
    async fn test_paid_account_is_unmetered() {
        let me = caller(Role::Paid);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Paid, 0));

        assert_eq!(check_and_reserve(&store, &me).await.unwrap(), QuotaGate::Unmetered);
        commit(&store, QuotaGate::Unmetered).await.unwrap();
        assert_eq!(store.charges(), 0);
    }

    #[tokio::test]
    async fn test_stored_tier_wins_over_token_tier() {
        let me = caller(Role::Paid);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Free, 0));

        let err = check_and_reserve(&store, &me).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));
    }

    #[tokio::test]
    async fn test_stale_month_restores_allowance_before_the_check() {
        let me = caller(Role::Free);
        let stale = QuotaAccount {
            role: Role::Free,
            remaining: 0,
            last_reset: Utc::now() - Duration::days(40),
        };
        let store = MemoryQuotaStore::default().with(me.user_id, stale);

        let gate = check_and_reserve(&store, &me).await.unwrap();
        assert_eq!(gate, QuotaGate::Metered { user_id: me.user_id });
        assert_eq!(store.remaining(me.user_id), Some(FREE_MONTHLY_ALLOWANCE));
    }

    #[tokio::test]
    async fn test_unknown_user_is_unauthorized() {
        let store = MemoryQuotaStore::default();
        let err = check_and_reserve(&store, &caller(Role::Free)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_metered_work_is_charged_once() {
        let me = caller(Role::Free);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Free, 2));

        let value = metered(&store, &me, async { Ok::<_, AppError>(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(store.remaining(me.user_id), Some(1));
        assert_eq!(store.charges(), 1);
    }

    #[tokio::test]
    async fn test_failed_work_is_not_charged() {
        let me = caller(Role::Free);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Free, 2));

        let result: Result<(), AppError> = metered(&store, &me, async {
            Err(AppError::Llm("provider down".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Llm(_))));
        assert_eq!(store.remaining(me.user_id), Some(2));
        assert_eq!(store.charges(), 0);
    }

    #[tokio::test]
    async fn test_refused_gate_never_starts_the_work() {
        let me = caller(Role::Free);
        let store = MemoryQuotaStore::default().with(me.user_id, account(Role::Free, 0));
        let started = std::sync::atomic::AtomicBool::new(false);

        let result = metered(&store, &me, async {
            started.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, AppError>(())
        })
        .await;

        assert!(matches!(result, Err(AppError::QuotaExceeded)));
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(store.charges(), 0);
    }

    #[tokio::test]
    async fn test_charge_never_goes_below_zero() {
        let user_id = Uuid::new_v4();
        let store = MemoryQuotaStore::default().with(user_id, account(Role::Free, 0));
        commit(&store, QuotaGate::Metered { user_id }).await.unwrap();
        assert_eq!(store.remaining(user_id), Some(0));
    }
}
