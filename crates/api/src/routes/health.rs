use axum::{Json, extract::State};
use chrono::Utc;
use serde::Serialize;

use crate::{AppState, GpuInfo};

#[derive(Debug, Serialize)]
pub struct QueueInfo {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: moji_model::ModelStatus,
    pub queue: QueueInfo,
    pub gpu: GpuInfo,
    pub uptime_seconds: i64,
}

/// `GET /api/health` — liveness plus model state, queue depth and GPU
/// presence.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service health")),
    tag = "health",
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.manager.status(),
        queue: QueueInfo {
            depth: state.queue.depth(),
            capacity: state.queue.capacity(),
        },
        gpu: state.gpu.clone(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}
