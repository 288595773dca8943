mod env;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request};
use moji_api::{ApiConfig, AppState, GpuInfo};
use moji_media::{Extractor, Fetcher};
use moji_model::ModelManager;
use moji_store::{JobDirs, JobStore};
use moji_worker::{
    CompletionHub, JobProcessor, ProcessorConfig, WebhookNotifier, job_queue,
    spawn_retention_sweeper, startup_sweep,
};
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::prelude::*;

use env::env;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let env = env();

    let dirs = JobDirs::new(&env.data_dir);
    dirs.ensure_base_dirs()?;
    let store = Arc::new(JobStore::open(&dirs.db_path())?);

    let manager = ModelManager::builder(&env.whisper_model)
        .idle_timeout(Duration::from_secs(env.model_unload_minutes * 60))
        .load_timeout(Duration::from_secs(env.model_load_timeout_secs))
        .build();

    let gpu = GpuInfo::probe();
    match &gpu.name {
        Some(name) => tracing::info!(gpu = %name, "gpu_detected"),
        None => tracing::warn!("no_gpu_detected"),
    }

    let (queue, queue_rx) = job_queue(env.queue_capacity);
    let completions = CompletionHub::new();

    // reconcile rows left over from a previous process before taking traffic
    let (requeued, stale) = startup_sweep(&store, &dirs, &queue);
    if requeued > 0 || stale > 0 {
        tracing::info!(requeued, stale, "restart_recovery_finished");
    }

    let processor = JobProcessor::new(
        Arc::clone(&store),
        dirs.clone(),
        manager.clone(),
        Fetcher::new(env.max_upload_size_mb),
        Extractor::new(),
        WebhookNotifier::new(),
        completions.clone(),
        ProcessorConfig {
            stage_timeout: Duration::from_secs(env.stage_timeout_minutes * 60),
            keep_source: env.keep_source,
        },
    );
    let worker = processor.spawn(queue_rx);

    let (sweeper_shutdown_tx, sweeper_shutdown_rx) = tokio::sync::watch::channel(());
    spawn_retention_sweeper(
        Arc::clone(&store),
        dirs.clone(),
        RETENTION_SWEEP_INTERVAL,
        sweeper_shutdown_rx,
    );

    let state = AppState::new(
        store,
        dirs,
        queue,
        manager,
        completions,
        ApiConfig {
            admin_password: env.admin_password.clone(),
            api_key: env.api_key.clone(),
            retention_days: env.job_retention_days,
            max_upload_bytes: env.max_upload_size_mb * 1024 * 1024,
            sync_request_timeout: Duration::from_secs(env.sync_request_timeout_secs),
            model_id: env.whisper_model.clone(),
        },
        gpu,
    );

    let app = moji_api::router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods(cors::Any)
                .allow_headers(cors::Any),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let path = request.uri().path();
                if path == "/api/health" {
                    return tracing::Span::none();
                }
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %path,
                )
            }),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], env.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(sweeper_shutdown_tx);
    worker.abort();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("shutdown_signal_received");
}
