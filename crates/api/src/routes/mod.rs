pub mod admin;
pub mod health;
pub mod jobs;
pub mod openai;

use std::path::PathBuf;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use moji_media::UploadSink;
use moji_model::DecodeOptions;
use moji_store::{Job, JobStore, SourceKind, generate_job_id};
use moji_worker::QueuedJob;

use crate::auth;
use crate::error::{ApiError, Result};
use crate::AppState;

const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = (state.config.max_upload_bytes + BODY_LIMIT_SLACK) as usize;

    let native = Router::new()
        .route("/api/jobs", post(jobs::submit).get(jobs::list))
        .route("/api/jobs/{job_id}", get(jobs::status).delete(jobs::remove))
        .route("/api/jobs/{job_id}/download", get(jobs::download))
        .route("/api/health", get(health::health));

    let admin = Router::new()
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/model/load", post(admin::model_load))
        .route("/api/admin/model/unload", post(admin::model_unload))
        .route("/api/admin/cleanup", post(admin::cleanup))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let compat = Router::new()
        .route("/v1/audio/transcriptions", post(openai::transcriptions))
        .route("/v1/audio/translations", post(openai::translations))
        .route("/v1/audio/models", get(openai::models));

    Router::new()
        .merge(native)
        .merge(admin)
        .merge(compat)
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(crate::openapi::openapi())
}

/// A payload streamed to the staging area; not yet attached to any job.
pub(crate) struct StagedUpload {
    pub path: PathBuf,
    pub file_name: String,
}

/// Streams one multipart file field into staging, enforcing the upload cap
/// before any job row exists.
pub(crate) async fn stage_upload_field(
    state: &AppState,
    field: &mut axum::extract::multipart::Field<'_>,
) -> Result<StagedUpload> {
    let file_name = field
        .file_name()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "upload.bin".to_string());

    let staging_path = state
        .dirs
        .staging_dir()
        .join(format!("{}.upload", uuid::Uuid::new_v4()));

    let mut sink = UploadSink::create(&staging_path, state.config.max_upload_bytes).await?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = sink.write_chunk(&chunk).await {
                    sink.discard().await;
                    return Err(e.into());
                }
            }
            Ok(None) => break,
            Err(e) => {
                sink.discard().await;
                return Err(ApiError::Validation(format!("invalid multipart body: {e}")));
            }
        }
    }

    match sink.finish().await {
        Ok((path, size)) => {
            tracing::debug!(path = %path.display(), size_bytes = size, "upload_staged");
            Ok(StagedUpload { path, file_name })
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&staging_path).await;
            Err(match e {
                moji_media::Error::EmptyOutput(_) => {
                    ApiError::Validation("uploaded file is empty".to_string())
                }
                other => other.into(),
            })
        }
    }
}

/// File extension carried into `input/source.{ext}`; anything suspicious
/// degrades to `bin`.
pub(crate) fn safe_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn insert_with_fresh_id(store: &JobStore, mut job: Job) -> Result<Job> {
    for _ in 0..5 {
        match store.insert(&job) {
            Ok(()) => return Ok(job),
            Err(moji_store::Error::DuplicateId(_)) => job.job_id = generate_job_id(),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ApiError::DuplicateId(job.job_id))
}

pub(crate) async fn discard_staged(staged: Option<StagedUpload>) {
    if let Some(staged) = staged {
        let _ = tokio::fs::remove_file(&staged.path).await;
    }
}

/// First half of admission: insert the row and materialize the directory
/// tree (promoting a staged upload into it). Any failure unwinds everything
/// so a rejected request leaves no residue. The job is NOT on the queue yet;
/// callers that need a completion signal subscribe between this and
/// [`enqueue_admitted`], before the worker can possibly see the job.
pub(crate) async fn admit_job(
    state: &AppState,
    source_kind: SourceKind,
    source_ref: String,
    webhook_url: Option<String>,
    staged: Option<StagedUpload>,
) -> Result<Job> {
    let job = Job::new(
        source_kind,
        source_ref,
        webhook_url,
        state.config.retention_days,
    );

    let job = match insert_with_fresh_id(&state.store, job) {
        Ok(job) => job,
        Err(e) => {
            discard_staged(staged).await;
            return Err(e);
        }
    };

    if let Err(e) = materialize(state, &job, &staged).await {
        let _ = state.dirs.remove_job_tree(&job.job_id);
        let _ = state.store.delete(&job.job_id);
        discard_staged(staged).await;
        return Err(e);
    }

    Ok(job)
}

/// Second half of admission: hand the job to the worker. A saturated queue
/// unwinds the row and the directory so `queue_full` means no job exists.
pub(crate) fn enqueue_admitted(state: &AppState, job: &Job, decode: DecodeOptions) -> Result<()> {
    let queued = QueuedJob::new(&job.job_id).with_decode(decode);
    if state.queue.enqueue(queued).is_err() {
        let _ = state.dirs.remove_job_tree(&job.job_id);
        let _ = state.store.delete(&job.job_id);
        return Err(ApiError::QueueFull);
    }

    tracing::info!(
        job_id = %job.job_id,
        source_kind = %job.source_kind,
        "job_admitted"
    );
    Ok(())
}

/// The whole admission path, for callers that never wait on the result.
pub(crate) async fn create_and_enqueue(
    state: &AppState,
    source_kind: SourceKind,
    source_ref: String,
    webhook_url: Option<String>,
    staged: Option<StagedUpload>,
    decode: DecodeOptions,
) -> Result<Job> {
    let job = admit_job(state, source_kind, source_ref, webhook_url, staged).await?;
    enqueue_admitted(state, &job, decode)?;
    Ok(job)
}

async fn materialize(state: &AppState, job: &Job, staged: &Option<StagedUpload>) -> Result<()> {
    state
        .dirs
        .create_job_tree(&job.job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(staged) = staged {
        let ext = safe_extension(&staged.file_name);
        let target = state.dirs.source_path(&job.job_id, &ext);
        tokio::fs::rename(&staged.path, &target)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(safe_extension("clip.MP4"), "mp4");
        assert_eq!(safe_extension("audio.wav"), "wav");
        assert_eq!(safe_extension("noext"), "bin");
        assert_eq!(safe_extension("weird.../../x"), "bin");
        assert_eq!(safe_extension("too.longext"), "bin");
    }
}
