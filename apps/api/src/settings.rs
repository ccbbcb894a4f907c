//! Account settings for the signed-in user: profile, password, notification
//! preferences and a read-only view of plan usage.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::account::{is_valid_email, normalize_email};
use crate::auth::jwt::Principal;
use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::errors::AppError;
use crate::models::preference::{PreferencePatch, PreferenceRow};
use crate::models::user::{is_unique_violation, PublicUser, Role, UserRow};
use crate::quota::{effective_remaining, FREE_MONTHLY_ALLOWANCE, PAID_USAGE_LIMIT};
use crate::response::{ApiResponse, MessageBody};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Usage {
    pub limit: i32,
    pub used: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub plan: &'static str,
    pub usage: Usage,
    pub email_verified: bool,
    pub last_password_change: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub user: SettingsProfile,
    pub notifications: PreferenceRow,
    pub account: AccountSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: PublicUser,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PasswordChangeRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: PreferenceRow,
    pub message: String,
}

pub fn plan_label(role: Role) -> &'static str {
    match role {
        Role::Paid => "Akun Pro",
        Role::Free => "Akun Gratis",
    }
}

/// Usage as shown on the settings page. Paid accounts are not metered, so
/// their `used` stays at zero.
pub fn usage_for(user: &UserRow, now: DateTime<Utc>) -> Usage {
    match user.role() {
        Role::Paid => Usage {
            limit: PAID_USAGE_LIMIT,
            used: 0,
        },
        Role::Free => {
            let remaining = effective_remaining(user.analysis_quota, user.last_quota_reset, now);
            Usage {
                limit: FREE_MONTHLY_ALLOWANCE,
                used: (FREE_MONTHLY_ALLOWANCE - remaining).max(0),
            }
        }
    }
}

fn account_summary(user: &UserRow, now: DateTime<Utc>) -> AccountSummary {
    AccountSummary {
        plan: plan_label(user.role()),
        usage: usage_for(user, now),
        email_verified: user.email_verified,
        last_password_change: user.updated_at,
        last_login_at: user.updated_at,
    }
}

async fn current_user(state: &AppState, principal: &Principal) -> Result<UserRow, AppError> {
    UserRow::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/settings/me
pub async fn handle_get_settings(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<SettingsResponse>, AppError> {
    let user = current_user(&state, &principal).await?;
    let notifications = PreferenceRow::ensure(&state.db, user.id).await?;

    Ok(ApiResponse::ok(SettingsResponse {
        account: account_summary(&user, Utc::now()),
        user: SettingsProfile {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role(),
            email_verified: user.email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        },
        notifications,
    }))
}

/// PUT /api/settings/profile
pub async fn handle_update_profile(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<ProfileRequest>,
) -> Result<ApiResponse<ProfileResponse>, AppError> {
    let name = req.name.map(|n| n.trim().to_string()).unwrap_or_default();
    let email = normalize_email(&req.email.unwrap_or_default());
    if name.is_empty() || email.is_empty() {
        return Err(AppError::Validation("Name and email are required".to_string()));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email".to_string()));
    }

    let user = current_user(&state, &principal).await?;
    let user = save_profile(&state, user.id, &name, &email).await?;

    info!(user_id = %user.id, "profile updated");
    Ok(ApiResponse::ok(ProfileResponse {
        user: PublicUser::from(&user),
        message: "Profile updated successfully".to_string(),
    }))
}

/// Writes name and email, answering 409 when another account holds the email.
pub async fn save_profile(
    state: &AppState,
    user_id: Uuid,
    name: &str,
    email: &str,
) -> Result<UserRow, AppError> {
    let in_use = || AppError::Conflict("Email is already in use".to_string());

    if UserRow::email_taken(&state.db, email, Some(user_id)).await? {
        return Err(in_use());
    }
    UserRow::update_profile(&state.db, user_id, name, email)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                in_use()
            } else {
                AppError::Database(e)
            }
        })
}

/// PUT /api/settings/password
pub async fn handle_change_password(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<PasswordChangeRequest>,
) -> Result<ApiResponse<MessageBody>, AppError> {
    let (current, new) = match (req.current_password, req.new_password) {
        (Some(c), Some(n)) if !c.is_empty() && !n.is_empty() => (c, n),
        _ => return Err(AppError::Validation("Both passwords are required".to_string())),
    };
    if new.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "New password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let user = current_user(&state, &principal).await?;
    if !verify_password(current, user.password_hash.clone()).await? {
        return Err(AppError::Validation("Current password is incorrect".to_string()));
    }

    let password_hash = hash_password(new).await?;
    UserRow::update_password(&state.db, user.id, &password_hash).await?;

    info!(user_id = %user.id, "password changed");
    Ok(ApiResponse::ok(MessageBody::new("Password updated successfully")))
}

/// PUT /api/settings/notifications
/// Only boolean values for the four known flags are applied.
pub async fn handle_update_notifications(
    State(state): State<AppState>,
    principal: Principal,
    Json(body): Json<Value>,
) -> Result<ApiResponse<NotificationsResponse>, AppError> {
    let patch = PreferencePatch::from_json(&body);
    if patch.is_empty() {
        return Err(AppError::Validation(
            "No valid notification settings provided".to_string(),
        ));
    }

    let notifications = PreferenceRow::apply(&state.db, principal.user_id, &patch).await?;
    Ok(ApiResponse::ok(NotificationsResponse {
        notifications,
        message: "Notification settings updated".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn user(role: &str, quota: i32, last_reset: DateTime<Utc>) -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            name: "Ana".into(),
            email: "ana@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: role.into(),
            email_verified: true,
            analysis_quota: quota,
            last_quota_reset: last_reset,
            created_at: last_reset,
            updated_at: last_reset,
        }
    }

    #[test]
    fn test_free_usage_counts_spent_analyses() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 8, 0, 0).unwrap();
        let usage = usage_for(&user("free", 2, now - Duration::days(3)), now);
        assert_eq!(usage, Usage { limit: 5, used: 3 });
    }

    #[test]
    fn test_free_usage_is_zero_after_month_rollover() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 1).unwrap();
        let last = Utc.with_ymd_and_hms(2025, 6, 30, 23, 0, 0).unwrap();
        assert_eq!(usage_for(&user("free", 0, last), now).used, 0);
    }

    #[test]
    fn test_paid_usage_uses_display_limit() {
        let now = Utc::now();
        assert_eq!(usage_for(&user("paid", 0, now), now), Usage { limit: 20, used: 0 });
        assert_eq!(plan_label(Role::Paid), "Akun Pro");
        assert_eq!(plan_label(Role::Free), "Akun Gratis");
    }

    #[test]
    fn test_account_summary_shape() {
        let now = Utc::now();
        let json = serde_json::to_value(account_summary(&user("free", 5, now), now)).unwrap();
        assert_eq!(json["plan"], "Akun Gratis");
        assert_eq!(json["usage"]["limit"], 5);
        assert_eq!(json["emailVerified"], true);
        assert!(json.get("lastPasswordChange").is_some());
    }

    #[test]
    fn test_password_change_request_reads_camel_case() {
        let req: PasswordChangeRequest = serde_json::from_value(serde_json::json!({
            "currentPassword": "old-secret", "newPassword": "new-secret"
        }))
        .unwrap();
        assert_eq!(req.current_password.as_deref(), Some("old-secret"));
        assert_eq!(req.new_password.as_deref(), Some("new-secret"));
    }
}
