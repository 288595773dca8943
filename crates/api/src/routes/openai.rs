use axum::{
    Json,
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};
use moji_model::{DecodeOptions, Task};
use moji_store::{JobStatus, SourceKind};
use moji_transcript::{OutputFormat, Transcript};
use serde_json::json;

use super::{StagedUpload, admit_job, discard_staged, enqueue_admitted, stage_upload_field};
use crate::error::{ApiError, Result};
use crate::AppState;

/// `response_format` values accepted by the compatible surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResponseFormat {
    #[default]
    Json,
    Text,
    Srt,
    Vtt,
    VerboseJson,
}

impl ResponseFormat {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "srt" => Ok(Self::Srt),
            "vtt" => Ok(Self::Vtt),
            "verbose_json" => Ok(Self::VerboseJson),
            other => Err(ApiError::Validation(format!(
                "unsupported response_format: {other}"
            ))),
        }
    }
}

#[derive(Default)]
struct CompatRequest {
    staged: Option<StagedUpload>,
    language: Option<String>,
    prompt: Option<String>,
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

async fn parse_request(state: &AppState, mut multipart: Multipart) -> Result<CompatRequest> {
    let mut request = CompatRequest::default();

    let outcome = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?
        {
            let text_error =
                |e: axum::extract::multipart::MultipartError| ApiError::Validation(e.to_string());

            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    request.staged = Some(stage_upload_field(state, &mut field).await?);
                }
                // the server always runs its configured model
                "model" => {
                    let _ = field.text().await;
                }
                "language" => {
                    let value = field.text().await.map_err(text_error)?;
                    if !value.trim().is_empty() {
                        request.language = Some(value.trim().to_string());
                    }
                }
                "prompt" => {
                    let value = field.text().await.map_err(text_error)?;
                    if !value.is_empty() {
                        request.prompt = Some(value);
                    }
                }
                "temperature" => {
                    let value = field.text().await.map_err(text_error)?;
                    request.temperature = Some(value.trim().parse::<f32>().map_err(|_| {
                        ApiError::Validation(format!("invalid temperature: {value}"))
                    })?);
                }
                "response_format" => {
                    let value = field.text().await.map_err(text_error)?;
                    request.response_format = ResponseFormat::parse(value.trim())?;
                }
                _ => {}
            }
        }

        if request.staged.is_none() {
            return Err(ApiError::Validation("file field is required".to_string()));
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        discard_staged(request.staged.take()).await;
        return Err(e);
    }
    Ok(request)
}

/// `POST /v1/audio/transcriptions` — the inline, synchronous variant. The
/// request rides the same queue and worker as native jobs; the handler just
/// subscribes to the job's completion signal and renders the artifact.
#[utoipa::path(
    post,
    path = "/v1/audio/transcriptions",
    responses(
        (status = 200, description = "Transcription result"),
        (status = 400, description = "Validation error", body = crate::ErrorResponse),
        (status = 429, description = "Queue full", body = crate::ErrorResponse),
        (status = 504, description = "Request deadline exceeded", body = crate::ErrorResponse),
    ),
    tag = "openai-compat",
)]
pub async fn transcriptions(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response> {
    run_inline(state, multipart, Task::Transcribe).await
}

/// `POST /v1/audio/translations` — identical path with the decode task
/// constrained to English output.
#[utoipa::path(
    post,
    path = "/v1/audio/translations",
    responses(
        (status = 200, description = "Translation result"),
        (status = 400, description = "Validation error", body = crate::ErrorResponse),
    ),
    tag = "openai-compat",
)]
pub async fn translations(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response> {
    run_inline(state, multipart, Task::Translate).await
}

async fn run_inline(state: AppState, multipart: Multipart, task: Task) -> Result<Response> {
    let mut request = parse_request(&state, multipart).await?;

    let staged = request.staged.take();
    let file_name = staged
        .as_ref()
        .map(|s| s.file_name.clone())
        .unwrap_or_default();

    // without an explicit language the server keeps its Japanese tuning;
    // the parameter is honored but never re-tunes the rest of the bundle
    let decode = DecodeOptions {
        language: request.language.clone().or_else(|| Some("ja".to_string())),
        task,
        temperature: request.temperature,
        initial_prompt: request.prompt.clone(),
    };

    let job = admit_job(&state, SourceKind::Upload, file_name, None, staged).await?;

    // take the completion ticket before the worker can see the job: the
    // processor publishes exactly once and only to existing subscriptions,
    // so subscribing after enqueue would race a fast completion
    let ticket = state.completions.subscribe(&job.job_id);
    if let Err(e) = enqueue_admitted(&state, &job, decode) {
        state.completions.forget(&job.job_id);
        return Err(e);
    }

    let terminal = ticket.wait(state.config.sync_request_timeout).await;

    match terminal {
        None => {
            // the job keeps running; only the synchronous response is lost
            tracing::warn!(job_id = %job.job_id, "sync_request_deadline_exceeded");
            Err(ApiError::Timeout)
        }
        Some(JobStatus::Failed) => {
            let job = state.store.get(&job.job_id)?;
            let error = job.error.unwrap_or_else(|| {
                moji_store::JobErrorObject::new("internal_error", "job failed without detail")
            });
            Err(ApiError::Pipeline {
                kind: error.kind,
                message: error.message,
            })
        }
        Some(_) => respond(&state, &job.job_id, task, request.response_format).await,
    }
}

async fn respond(
    state: &AppState,
    job_id: &str,
    task: Task,
    format: ResponseFormat,
) -> Result<Response> {
    let read_artifact = |format: OutputFormat| {
        let path = state.dirs.artifact_path(job_id, format);
        async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ApiError::Internal(format!("artifact read failed: {e}")))
        }
    };

    match format {
        ResponseFormat::Json | ResponseFormat::VerboseJson => {
            let raw = read_artifact(OutputFormat::Json).await?;
            let transcript = Transcript::from_json(&raw)
                .map_err(|e| ApiError::Internal(format!("transcript parse failed: {e}")))?;

            if format == ResponseFormat::Json {
                return Ok(Json(json!({ "text": transcript.text })).into_response());
            }

            let task = match task {
                Task::Transcribe => "transcribe",
                Task::Translate => "translate",
            };
            Ok(Json(json!({
                "task": task,
                "language": transcript.language,
                "duration": transcript.duration,
                "text": transcript.text,
                "segments": transcript.segments,
            }))
            .into_response())
        }
        ResponseFormat::Text => {
            let body = read_artifact(OutputFormat::Txt).await?;
            Ok(plain_text(body, "text/plain; charset=utf-8"))
        }
        ResponseFormat::Srt => {
            let body = read_artifact(OutputFormat::Srt).await?;
            Ok(plain_text(body, "application/x-subrip"))
        }
        ResponseFormat::Vtt => {
            let body = read_artifact(OutputFormat::Vtt).await?;
            Ok(plain_text(body, "text/vtt"))
        }
    }
}

fn plain_text(body: String, content_type: &'static str) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// `GET /v1/audio/models` — the fixed single-entry list.
#[utoipa::path(
    get,
    path = "/v1/audio/models",
    responses((status = 200, description = "Available models")),
    tag = "openai-compat",
)]
pub async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.model_id,
            "object": "model",
            "created": state.started_at.timestamp(),
            "owned_by": "moji",
        }],
    }))
}
