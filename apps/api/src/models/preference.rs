use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Notification preferences, one row per user, created on first access.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRow {
    #[serde(skip)]
    pub user_id: Uuid,
    pub email_updates: bool,
    pub analysis_complete: bool,
    pub weekly_tips: bool,
    pub promotions: bool,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the stored flag.
#[derive(Debug, Clone, Default)]
pub struct PreferencePatch {
    pub email_updates: Option<bool>,
    pub analysis_complete: Option<bool>,
    pub weekly_tips: Option<bool>,
    pub promotions: Option<bool>,
}

impl PreferencePatch {
    /// Picks the four flags from a JSON body. Keys whose value is not a
    /// boolean are ignored.
    pub fn from_json(body: &Value) -> Self {
        let flag = |key: &str| body.get(key).and_then(Value::as_bool);
        Self {
            email_updates: flag("emailUpdates"),
            analysis_complete: flag("analysisComplete"),
            weekly_tips: flag("weeklyTips"),
            promotions: flag("promotions"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email_updates.is_none()
            && self.analysis_complete.is_none()
            && self.weekly_tips.is_none()
            && self.promotions.is_none()
    }
}

const PREFERENCE_COLUMNS: &str =
    "user_id, email_updates, analysis_complete, weekly_tips, promotions, updated_at";

impl PreferenceRow {
    /// Returns the user's preferences, inserting the defaults first if absent.
    /// Safe to call concurrently: the insert is a no-op when the row exists.
    pub async fn ensure(db: &PgPool, user_id: Uuid) -> Result<PreferenceRow, sqlx::Error> {
        sqlx::query("INSERT INTO user_preferences (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(db)
            .await?;

        sqlx::query_as::<_, PreferenceRow>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM user_preferences WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_one(db)
        .await
    }

    pub async fn apply(
        db: &PgPool,
        user_id: Uuid,
        patch: &PreferencePatch,
    ) -> Result<PreferenceRow, sqlx::Error> {
        Self::ensure(db, user_id).await?;
        sqlx::query_as::<_, PreferenceRow>(&format!(
            "UPDATE user_preferences
             SET email_updates = COALESCE($2, email_updates),
                 analysis_complete = COALESCE($3, analysis_complete),
                 weekly_tips = COALESCE($4, weekly_tips),
                 promotions = COALESCE($5, promotions),
                 updated_at = now()
             WHERE user_id = $1
             RETURNING {PREFERENCE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(patch.email_updates)
        .bind(patch.analysis_complete)
        .bind(patch.weekly_tips)
        .bind(patch.promotions)
        .fetch_one(db)
        .await
    }
}
