//! Result Store: one `analyses` row per CV + job description submission.
//!
//! Every read and write is scoped by `(id, user_id)`; a row owned by someone
//! else behaves exactly like a missing row.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::schemas::{
    CoverLetterDraft, CoverLetterTips, CvAnalysis, InterviewPack, SummaryOptions,
};

pub const UNKNOWN_POSITION: &str = "Unknown Position";
pub const UNKNOWN_COMPANY: &str = "Unknown Company";
/// Placeholder the client sends when the user names no company.
pub const DEFAULT_TARGET_COMPANY: &str = "Target Company";

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_title: String,
    pub company: String,
    pub job_description: String,
    pub cv_text: String,
    pub score: i32,
    pub status: String,
    pub analysis_result: Value,
    pub summary_options: Option<Value>,
    pub cover_letter: Option<String>,
    pub cover_letter_edited: bool,
    pub cover_letter_tips: Option<Value>,
    pub interview_questions: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal projection for the history list.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: Uuid,
    pub job_title: String,
    pub company: String,
    pub score: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewAnalysis<'a> {
    pub user_id: Uuid,
    pub job_title: &'a str,
    pub company: &'a str,
    pub job_description: &'a str,
    pub cv_text: &'a str,
    pub result: &'a CvAnalysis,
}

const ANALYSIS_COLUMNS: &str = "id, user_id, job_title, company, job_description, cv_text, \
     score, status, analysis_result, summary_options, cover_letter, cover_letter_edited, \
     cover_letter_tips, interview_questions, created_at, updated_at";

/// Company stored on a new record: an explicit target wins, otherwise the
/// company the model read from the job description.
pub fn resolve_company(target: &str, generated: Option<&str>) -> String {
    let target = target.trim();
    if !target.is_empty() && target != DEFAULT_TARGET_COMPANY {
        return target.to_string();
    }
    generated
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_COMPANY)
        .to_string()
}

pub fn resolve_job_title(generated: Option<&str>) -> String {
    generated
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_POSITION)
        .to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Queries
// ────────────────────────────────────────────────────────────────────────────

/// Inserts a new record. Never updates an existing one.
pub async fn insert_analysis(db: &PgPool, new: NewAnalysis<'_>) -> Result<AnalysisRow, AppError> {
    let row = sqlx::query_as::<_, AnalysisRow>(&format!(
        "INSERT INTO analyses
             (user_id, job_title, company, job_description, cv_text, score, status, analysis_result)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {ANALYSIS_COLUMNS}"
    ))
    .bind(new.user_id)
    .bind(new.job_title)
    .bind(new.company)
    .bind(new.job_description)
    .bind(new.cv_text)
    .bind(new.result.rounded_score())
    .bind(new.result.status.as_str())
    .bind(Json(new.result))
    .fetch_one(db)
    .await?;
    Ok(row)
}

pub async fn find_owned(db: &PgPool, id: Uuid, user_id: Uuid) -> Result<AnalysisRow, AppError> {
    sqlx::query_as::<_, AnalysisRow>(&format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(not_found)
}

/// Newest first.
pub async fn list_history(db: &PgPool, user_id: Uuid) -> Result<Vec<HistoryRow>, AppError> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT id, job_title, company, score, status, created_at
         FROM analyses
         WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn save_summary(
    db: &PgPool,
    id: Uuid,
    user_id: Uuid,
    summary: &SummaryOptions,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE analyses SET summary_options = $3, updated_at = now()
         WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .bind(Json(summary))
    .execute(db)
    .await?;
    expect_one(result.rows_affected())
}

/// Stores a generated letter and its tips, replacing any edited version.
pub async fn save_cover_letter(
    db: &PgPool,
    id: Uuid,
    user_id: Uuid,
    draft: &CoverLetterDraft,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE analyses
         SET cover_letter = $3, cover_letter_tips = $4, cover_letter_edited = FALSE, updated_at = now()
         WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .bind(&draft.cover_letter)
    .bind(Json(&draft.tips))
    .execute(db)
    .await?;
    expect_one(result.rows_affected())
}

/// Replaces the letter text with a user edit. Tips are left untouched.
pub async fn update_cover_letter(
    db: &PgPool,
    id: Uuid,
    user_id: Uuid,
    cover_letter: &str,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE analyses
         SET cover_letter = $3, cover_letter_edited = TRUE, updated_at = now()
         WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .bind(cover_letter)
    .execute(db)
    .await?;
    expect_one(result.rows_affected())
}

pub async fn save_interview(
    db: &PgPool,
    id: Uuid,
    user_id: Uuid,
    pack: &InterviewPack,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE analyses SET interview_questions = $3, updated_at = now()
         WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .bind(Json(pack))
    .execute(db)
    .await?;
    expect_one(result.rows_affected())
}

fn not_found() -> AppError {
    AppError::NotFound("Analysis not found".to_string())
}

fn expect_one(rows_affected: u64) -> Result<(), AppError> {
    if rows_affected == 0 {
        return Err(not_found());
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Stored artifacts
// ────────────────────────────────────────────────────────────────────────────

/// Decodes a JSON column. Older rows may hold the document serialized as a
/// JSON string; both shapes are accepted.
pub fn decode_stored<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    let decoded = match value {
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };
    decoded.map_err(|e| AppError::Internal(anyhow!("stored artifact is malformed: {e}")))
}

impl AnalysisRow {
    pub fn stored_summary(&self) -> Result<Option<SummaryOptions>, AppError> {
        self.summary_options.clone().map(decode_stored).transpose()
    }

    /// The stored letter with its tips. An edited letter keeps the tips of
    /// the draft it was edited from; a letter without tips gets an empty list.
    pub fn stored_cover_letter(&self) -> Result<Option<CoverLetterDraft>, AppError> {
        let Some(letter) = self.cover_letter.as_ref().filter(|l| !l.is_empty()) else {
            return Ok(None);
        };
        let tips = match self.cover_letter_tips.clone() {
            Some(raw) => decode_stored(raw)?,
            None => CoverLetterTips { strengths: Vec::new() },
        };
        Ok(Some(CoverLetterDraft {
            cover_letter: letter.clone(),
            tips,
        }))
    }

    pub fn stored_interview(&self) -> Result<Option<InterviewPack>, AppError> {
        self.interview_questions.clone().map(decode_stored).transpose()
    }
}
