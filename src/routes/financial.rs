use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::analysis::BilanReport;
use crate::error::{AppError, AppResult};
use crate::orchestrator::{
    self, AnalysisSummary, DocumentRef, UploadedDocument, analyze_document,
};

#[derive(Debug, Deserialize)]
pub struct BilanQuery {
    pub period_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRefBody {
    pub id: String,
    pub filename: String,
    #[serde(rename = "cloudinaryUrl", default)]
    pub cloudinary_url: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BilanFromUrlsBody {
    #[serde(default)]
    pub documents: Vec<DocumentRefBody>,
    #[serde(default = "default_remote_period_days")]
    pub period_days: u32,
    #[serde(default = "empty_object")]
    pub business_info: Value,
}

// The upload variant defaults to 30 days while the remote-reference variant
// defaults to 90. Observed behavior of the original API, kept as-is.
const DEFAULT_UPLOAD_PERIOD_DAYS: u32 = 30;

fn default_remote_period_days() -> u32 {
    90
}

fn empty_object() -> Value {
    json!({})
}

async fn read_field(field: axum::extract::multipart::Field<'_>) -> AppResult<UploadedDocument> {
    let filename = field.file_name().unwrap_or("document").to_string();
    let content = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("failed to read uploaded file: {e}")))?;
    Ok(UploadedDocument {
        filename,
        content: content.to_vec(),
    })
}

/// POST /financial/analyze — analyze a single uploaded document.
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<AnalysisSummary>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            upload = Some(read_field(field).await?);
            break;
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("file field is required".to_string()))?;

    let summary = analyze_document(
        state.analysis.as_ref(),
        &state.config.staging_dir,
        &upload.content,
        &upload.filename,
    )
    .await?;

    Ok(Json(summary))
}

/// POST /financial/bilan — generate a bilan from uploaded documents.
pub async fn bilan(
    State(state): State<AppState>,
    Query(params): Query<BilanQuery>,
    mut multipart: Multipart,
) -> AppResult<Json<BilanReport>> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("files") {
            files.push(read_field(field).await?);
        }
    }

    let period_days = params.period_days.unwrap_or(DEFAULT_UPLOAD_PERIOD_DAYS);

    let report = orchestrator::generate_bilan(
        state.analysis.as_ref(),
        &state.config.staging_dir,
        &files,
        period_days,
    )
    .await?;

    Ok(Json(report))
}

/// POST /financial/bilan-from-urls — generate a bilan from remotely hosted
/// documents.
pub async fn bilan_from_urls(
    State(state): State<AppState>,
    Json(body): Json<BilanFromUrlsBody>,
) -> AppResult<Json<BilanReport>> {
    let refs: Vec<DocumentRef> = body
        .documents
        .iter()
        .map(|doc| {
            tracing::debug!(
                document_id = %doc.id,
                document_type = doc.document_type.as_deref().unwrap_or("unknown"),
                created_at = doc.created_at.as_deref().unwrap_or(""),
                "received document reference"
            );
            DocumentRef {
                id: doc.id.clone(),
                filename: doc.filename.clone(),
                remote_url: doc.cloudinary_url.clone(),
            }
        })
        .collect();

    let report = orchestrator::generate_bilan_from_refs(
        state.analysis.as_ref(),
        state.fetcher.as_ref(),
        &state.config.staging_dir,
        &refs,
        body.period_days,
        body.business_info,
    )
    .await?;

    Ok(Json(report))
}
