mod auth;
mod error;
mod openapi;
mod routes;

pub use error::{ApiError, ErrorDetails, ErrorResponse};
pub use openapi::openapi;
pub use routes::router;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moji_model::ModelManager;
use moji_store::{JobDirs, JobStore};
use moji_worker::{CompletionHub, JobQueue};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub admin_password: String,
    pub api_key: Option<String>,
    pub retention_days: i64,
    pub max_upload_bytes: u64,
    pub sync_request_timeout: Duration,
    pub model_id: String,
}

/// Result of the one-shot GPU probe at startup; reported by the health
/// endpoint, never consulted by the pipeline itself.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GpuInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GpuInfo {
    pub fn probe() -> Self {
        let output = std::process::Command::new("nvidia-smi")
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let name = String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty());
                Self {
                    available: name.is_some(),
                    name,
                }
            }
            _ => Self::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub dirs: JobDirs,
    pub queue: JobQueue,
    pub manager: ModelManager,
    pub completions: CompletionHub,
    pub config: ApiConfig,
    pub gpu: GpuInfo,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        dirs: JobDirs,
        queue: JobQueue,
        manager: ModelManager,
        completions: CompletionHub,
        config: ApiConfig,
        gpu: GpuInfo,
    ) -> Self {
        Self {
            store,
            dirs,
            queue,
            manager,
            completions,
            config,
            gpu,
            started_at: Utc::now(),
        }
    }
}
