use axum::{Json, extract::State};
use serde_json::json;

use crate::error::{ApiError, Result};
use crate::AppState;

fn map_model_error(e: moji_model::Error) -> ApiError {
    match e {
        moji_model::Error::Busy => ApiError::ModelBusy,
        e if e.is_unavailable() => ApiError::ModelUnavailable(e.to_string()),
        other => ApiError::Internal(other.to_string()),
    }
}

/// `GET /api/admin/stats`
#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "Operational stats"),
        (status = 401, description = "Missing admin credentials", body = crate::ErrorResponse),
        (status = 403, description = "Bad admin credentials", body = crate::ErrorResponse),
    ),
    tag = "admin",
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let counts = state.store.counts()?;
    Ok(Json(json!({
        "jobs": counts,
        "queue": { "depth": state.queue.depth(), "capacity": state.queue.capacity() },
        "model": state.manager.status(),
        "data_root": state.dirs.data_root().display().to_string(),
    })))
}

/// `POST /api/admin/model/load` — warm-start the model.
#[utoipa::path(
    post,
    path = "/api/admin/model/load",
    responses(
        (status = 200, description = "Model loaded"),
        (status = 500, description = "Load failed", body = crate::ErrorResponse),
    ),
    tag = "admin",
)]
pub async fn model_load(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.manager.load().await.map_err(map_model_error)?;
    Ok(Json(json!({ "model": state.manager.status() })))
}

/// `POST /api/admin/model/unload` — release VRAM now.
#[utoipa::path(
    post,
    path = "/api/admin/model/unload",
    responses(
        (status = 200, description = "Model unloaded"),
        (status = 409, description = "Model busy", body = crate::ErrorResponse),
    ),
    tag = "admin",
)]
pub async fn model_unload(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.manager.unload().await.map_err(map_model_error)?;
    Ok(Json(json!({ "model": state.manager.status() })))
}

/// `POST /api/admin/cleanup` — force a retention sweep outside the timer.
#[utoipa::path(
    post,
    path = "/api/admin/cleanup",
    responses((status = 200, description = "Sweep stats")),
    tag = "admin",
)]
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let stats = moji_worker::sweep_once(&state.store, &state.dirs);
    Ok(Json(stats.to_json()))
}
