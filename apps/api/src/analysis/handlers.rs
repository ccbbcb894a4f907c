use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::analysis::extract::{self, DocumentKind, MAX_UPLOAD_BYTES};
use crate::analysis::store::{self, AnalysisRow, HistoryRow, NewAnalysis, DEFAULT_TARGET_COMPANY};
use crate::auth::jwt::Principal;
use crate::errors::AppError;
use crate::generation::cache::{reuse_or_generate, CacheOutcome};
use crate::generation::generator::{generate, StructuredGenerator};
use crate::generation::prompts::PromptContext;
use crate::generation::schemas::{
    Artifact, CoverLetterDraft, CvAnalysis, InterviewPack, SummaryOptions,
};
use crate::quota;
use crate::response::ApiResponse;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegenerateRequest {
    pub regenerate: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverLetterUpdate {
    pub cover_letter: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterEcho {
    pub cover_letter: String,
}

/// Raw multipart fields of an analysis upload.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub job_description: Option<String>,
    pub target_company: Option<String>,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub content_type: String,
    pub data: Bytes,
}

/// An upload that passed the cheap checks and is ready for extraction.
#[derive(Debug)]
pub struct ValidUpload {
    pub kind: DocumentKind,
    pub data: Bytes,
    pub job_description: String,
    pub target_company: String,
}

impl UploadForm {
    pub fn validate(self) -> Result<ValidUpload, AppError> {
        let file = self
            .file
            .filter(|f| !f.data.is_empty())
            .ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;

        let job_description = self
            .job_description
            .map(|j| j.trim().to_string())
            .filter(|j| !j.is_empty())
            .ok_or_else(|| AppError::Validation("Job description is required".to_string()))?;

        let kind = DocumentKind::from_mime(&file.content_type).ok_or_else(|| {
            AppError::Validation("Unsupported file format. Please upload PDF or DOCX.".to_string())
        })?;

        if file.data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(
                "File is too large. Maximum size is 10 MB.".to_string(),
            ));
        }

        let target_company = self
            .target_company
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_COMPANY.to_string());

        Ok(ValidUpload {
            kind,
            data: file.data,
            job_description,
            target_company,
        })
    }
}

async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm, AppError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "cvFile" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(invalid)?;
                form.file = Some(UploadedFile { content_type, data });
            }
            "jobDescription" => form.job_description = Some(field.text().await.map_err(invalid)?),
            "targetCompany" => form.target_company = Some(field.text().await.map_err(invalid)?),
            _ => {}
        }
    }
    Ok(form)
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Analysis not found".to_string()))
}

fn wants_regenerate(body: Option<Json<RegenerateRequest>>) -> bool {
    body.map(|Json(req)| req.regenerate).unwrap_or(false)
}

fn prompt_context(record: &AnalysisRow) -> PromptContext<'_> {
    PromptContext {
        job_description: &record.job_description,
        company: &record.company,
        cv_text: &record.cv_text,
        job_title: &record.job_title,
    }
}

/// Serves the stored artifact or generates a fresh one from the record.
/// Persisting a generated artifact is left to the caller.
async fn serve_artifact<T: Artifact>(
    generator: &dyn StructuredGenerator,
    record: &AnalysisRow,
    stored: Option<T>,
    regenerate: bool,
) -> Result<(T, CacheOutcome), AppError> {
    let ctx = prompt_context(record);
    reuse_or_generate(stored, regenerate, || generate::<T>(generator, &ctx)).await
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/analysis
/// Multipart: cvFile, jobDescription, targetCompany. Quota is charged only
/// after the record is stored.
pub async fn handle_create_analysis(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<ApiResponse<AnalysisRow>, AppError> {
    let upload = read_upload_form(&mut multipart).await?.validate()?;
    let timeout = Duration::from_secs(state.config.extraction_timeout_secs);

    let record = quota::metered(state.quota.as_ref(), &principal, async {
        let cv_text = extract::extract_text(upload.kind, upload.data.clone(), timeout).await?;
        extract::ensure_sufficient(&cv_text)?;

        let result = analyze(state.generator.as_ref(), &upload, &cv_text).await?;
        let job_title = store::resolve_job_title(Some(&result.job_title));
        let company = store::resolve_company(&upload.target_company, Some(&result.company));

        store::insert_analysis(
            &state.db,
            NewAnalysis {
                user_id: principal.user_id,
                job_title: &job_title,
                company: &company,
                job_description: &upload.job_description,
                cv_text: &cv_text,
                result: &result,
            },
        )
        .await
    })
    .await?;

    info!(
        user_id = %principal.user_id,
        analysis_id = %record.id,
        score = record.score,
        "analysis created"
    );
    Ok(ApiResponse::created(record))
}

async fn analyze(
    generator: &dyn StructuredGenerator,
    upload: &ValidUpload,
    cv_text: &str,
) -> Result<CvAnalysis, AppError> {
    let ctx = PromptContext {
        job_description: &upload.job_description,
        company: &upload.target_company,
        cv_text,
        job_title: "",
    };
    generate(generator, &ctx).await
}

/// GET /api/analysis/history
pub async fn handle_history(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<Vec<HistoryRow>>, AppError> {
    let rows = store::list_history(&state.db, principal.user_id).await?;
    Ok(ApiResponse::ok(rows))
}

/// GET /api/analysis/:id
pub async fn handle_get_analysis(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<ApiResponse<AnalysisRow>, AppError> {
    let record = store::find_owned(&state.db, parse_id(&id)?, principal.user_id).await?;
    Ok(ApiResponse::ok(record))
}

/// POST /api/analysis/:id/generate-summary
pub async fn handle_generate_summary(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<ApiResponse<SummaryOptions>, AppError> {
    let record = store::find_owned(&state.db, parse_id(&id)?, principal.user_id).await?;

    let (summary, outcome) = serve_artifact(
        state.generator.as_ref(),
        &record,
        record.stored_summary()?,
        wants_regenerate(body),
    )
    .await?;

    if outcome == CacheOutcome::Generated {
        store::save_summary(&state.db, record.id, principal.user_id, &summary).await?;
    }
    Ok(ApiResponse::ok(summary))
}

/// POST /api/analysis/:id/generate-cover-letter
pub async fn handle_generate_cover_letter(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<ApiResponse<CoverLetterDraft>, AppError> {
    let record = store::find_owned(&state.db, parse_id(&id)?, principal.user_id).await?;

    let (draft, outcome) = serve_artifact(
        state.generator.as_ref(),
        &record,
        record.stored_cover_letter()?,
        wants_regenerate(body),
    )
    .await?;

    if outcome == CacheOutcome::Generated {
        store::save_cover_letter(&state.db, record.id, principal.user_id, &draft).await?;
    }
    Ok(ApiResponse::ok(draft))
}

/// PUT /api/analysis/:id/cover-letter
pub async fn handle_update_cover_letter(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<CoverLetterUpdate>,
) -> Result<ApiResponse<CoverLetterEcho>, AppError> {
    let id = parse_id(&id)?;
    let cover_letter = req
        .cover_letter
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Cover letter is required".to_string()))?;

    store::update_cover_letter(&state.db, id, principal.user_id, &cover_letter).await?;

    info!(user_id = %principal.user_id, analysis_id = %id, "cover letter edited");
    Ok(ApiResponse::ok(CoverLetterEcho { cover_letter }))
}

/// POST /api/analysis/:id/generate-interview
pub async fn handle_generate_interview(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<ApiResponse<InterviewPack>, AppError> {
    let record = store::find_owned(&state.db, parse_id(&id)?, principal.user_id).await?;

    let (pack, outcome) = serve_artifact(
        state.generator.as_ref(),
        &record,
        record.stored_interview()?,
        wants_regenerate(body),
    )
    .await?;

    if outcome == CacheOutcome::Generated {
        store::save_interview(&state.db, record.id, principal.user_id, &pack).await?;
    }
    Ok(ApiResponse::ok(pack))
}
