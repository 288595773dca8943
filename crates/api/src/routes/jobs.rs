use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use moji_model::DecodeOptions;
use moji_store::{Job, JobErrorObject, JobStatus, SourceKind};
use moji_transcript::OutputFormat;
use moji_worker::download_urls;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

use super::{StagedUpload, create_and_enqueue, discard_staged, stage_upload_field};
use crate::auth;
use crate::error::{ApiError, Result};
use crate::AppState;

/// Wire shape of a job row on the native surface.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobView {
    pub job_id: String,
    pub source_kind: String,
    pub source_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub status: String,
    pub stage: String,
    pub progress: u8,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub failed_at: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub error: Option<JobErrorObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub result_formats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_urls: Option<BTreeMap<String, String>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let download_urls = (job.status == JobStatus::Completed)
            .then(|| download_urls(&job.job_id, &job.result_formats));
        Self {
            job_id: job.job_id,
            source_kind: job.source_kind.to_string(),
            source_ref: job.source_ref,
            webhook_url: job.webhook_url,
            status: job.status.to_string(),
            stage: job.stage,
            progress: job.progress,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            failed_at: job.failed_at,
            expires_at: job.expires_at,
            error: job.error,
            duration_seconds: job.duration_seconds,
            result_formats: job.result_formats.iter().map(|f| f.to_string()).collect(),
            download_urls,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse {
    pub jobs: Vec<JobView>,
    pub count: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DownloadQuery {
    pub format: String,
}

fn validate_absolute_http_url(raw: &str, field: &str) -> Result<()> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::Validation(format!(
            "{field} must be an absolute http(s) URL"
        ))),
    }
}

/// `POST /api/jobs` — form fields `url` xor `file`, optional `webhook_url`.
#[utoipa::path(
    post,
    path = "/api/jobs",
    responses(
        (status = 202, description = "Job accepted", body = SubmitResponse),
        (status = 400, description = "Validation error", body = crate::ErrorResponse),
        (status = 413, description = "Upload too large", body = crate::ErrorResponse),
        (status = 429, description = "Queue full", body = crate::ErrorResponse),
    ),
    tag = "jobs",
)]
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    auth::require_api_key(&state, &headers)?;

    let mut url: Option<String> = None;
    let mut webhook_url: Option<String> = None;
    let mut staged: Option<StagedUpload> = None;

    let outcome = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "url" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ApiError::Validation(format!("invalid url field: {e}")))?;
                    if !value.trim().is_empty() {
                        url = Some(value.trim().to_string());
                    }
                }
                "webhook_url" => {
                    let value = field.text().await.map_err(|e| {
                        ApiError::Validation(format!("invalid webhook_url field: {e}"))
                    })?;
                    if !value.trim().is_empty() {
                        webhook_url = Some(value.trim().to_string());
                    }
                }
                "file" => {
                    if staged.is_some() {
                        return Err(ApiError::Validation(
                            "only one file field is allowed".to_string(),
                        ));
                    }
                    staged = Some(stage_upload_field(&state, &mut field).await?);
                }
                _ => {}
            }
        }

        match (&url, &staged) {
            (Some(_), Some(_)) => Err(ApiError::Validation(
                "provide either url or file, not both".to_string(),
            )),
            (None, None) => Err(ApiError::Validation(
                "either url or file is required".to_string(),
            )),
            _ => Ok(()),
        }?;

        if let Some(raw) = &url {
            validate_absolute_http_url(raw, "url")?;
        }
        if let Some(raw) = &webhook_url {
            validate_absolute_http_url(raw, "webhook_url")?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        discard_staged(staged).await;
        return Err(e);
    }

    let (source_kind, source_ref) = match (&url, &staged) {
        (Some(url), _) => (SourceKind::Url, url.clone()),
        (None, Some(staged)) => (SourceKind::Upload, staged.file_name.clone()),
        (None, None) => unreachable!("validated above"),
    };

    let job = create_and_enqueue(
        &state,
        source_kind,
        source_ref,
        webhook_url,
        staged,
        DecodeOptions::japanese(),
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.job_id,
            status: job.status.to_string(),
            created_at: job.created_at,
            expires_at: job.expires_at,
        }),
    ))
}

/// `GET /api/jobs/{job_id}`
#[utoipa::path(
    get,
    path = "/api/jobs/{job_id}",
    responses(
        (status = 200, description = "Job row", body = JobView),
        (status = 404, description = "Unknown job", body = crate::ErrorResponse),
    ),
    tag = "jobs",
)]
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>> {
    let job = state.store.get(&job_id)?;
    Ok(Json(job.into()))
}

/// `GET /api/jobs` — paginated, newest first.
#[utoipa::path(
    get,
    path = "/api/jobs",
    responses(
        (status = 200, description = "Job listing", body = ListResponse),
    ),
    tag = "jobs",
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            JobStatus::from_str(s)
                .map_err(|_| ApiError::Validation(format!("unknown status filter: {s}")))
        })
        .transpose()?;

    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);

    let jobs: Vec<JobView> = state
        .store
        .list(status, limit, offset)?
        .into_iter()
        .map(JobView::from)
        .collect();

    let count = jobs.len();
    Ok(Json(ListResponse { jobs, count }))
}

/// `GET /api/jobs/{job_id}/download?format=` — streams one artifact.
#[utoipa::path(
    get,
    path = "/api/jobs/{job_id}/download",
    responses(
        (status = 200, description = "Artifact bytes"),
        (status = 400, description = "Unknown format", body = crate::ErrorResponse),
        (status = 404, description = "Job not completed or artifact absent", body = crate::ErrorResponse),
    ),
    tag = "jobs",
)]
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let format = OutputFormat::from_str(&query.format)
        .map_err(|_| ApiError::Validation(format!("unknown format: {}", query.format)))?;

    let job = state.store.get(&job_id)?;
    if job.status != JobStatus::Completed || !job.result_formats.contains(&format) {
        return Err(ApiError::NotFound(format!(
            "artifact {format} for {job_id}"
        )));
    }

    let path = state.dirs.artifact_path(&job_id, format);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("artifact {format} for {job_id}")))?;

    let body = Body::from_stream(ReaderStream::new(file));
    let disposition = format!(
        "attachment; filename=\"{}-{}\"",
        job_id,
        format.file_name()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `DELETE /api/jobs/{job_id}` — tree first, then row, any status.
#[utoipa::path(
    delete,
    path = "/api/jobs/{job_id}",
    responses(
        (status = 200, description = "Job deleted"),
        (status = 404, description = "Unknown job", body = crate::ErrorResponse),
    ),
    tag = "jobs",
)]
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    auth::require_api_key(&state, &headers)?;

    // row existence first so deleting twice reports not_found, then tree
    // before row so a crash never orphans a directory
    state.store.get(&job_id)?;
    state
        .dirs
        .remove_job_tree(&job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.store.delete(&job_id)?;

    tracing::info!(job_id = %job_id, "job_deleted");
    Ok(Json(serde_json::json!({ "deleted": job_id })))
}
