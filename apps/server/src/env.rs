use std::sync::OnceLock;

use serde::{Deserialize, Deserializer};

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> String {
    "/data".to_string()
}

fn default_whisper_model() -> String {
    "large-v3".to_string()
}

fn default_model_unload_minutes() -> u64 {
    5
}

fn default_job_retention_days() -> i64 {
    7
}

fn default_max_upload_size_mb() -> u64 {
    10240
}

fn default_queue_capacity() -> usize {
    100
}

fn default_stage_timeout_minutes() -> u64 {
    60
}

fn default_model_load_timeout_secs() -> u64 {
    120
}

fn default_sync_request_timeout_secs() -> u64 {
    600
}

fn filter_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// The whole configuration surface; every field is one of the documented
/// environment variables.
#[derive(Deserialize)]
pub struct Env {
    pub admin_password: String,
    #[serde(default, deserialize_with = "filter_empty")]
    pub api_key: Option<String>,
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
    #[serde(default = "default_model_unload_minutes")]
    pub model_unload_minutes: u64,
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: i64,
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_stage_timeout_minutes")]
    pub stage_timeout_minutes: u64,
    #[serde(default = "default_model_load_timeout_secs")]
    pub model_load_timeout_secs: u64,
    #[serde(default = "default_sync_request_timeout_secs")]
    pub sync_request_timeout_secs: u64,
    #[serde(default)]
    pub keep_source: bool,
}

static ENV: OnceLock<Env> = OnceLock::new();

pub fn env() -> &'static Env {
    ENV.get_or_init(|| {
        let _ = dotenvy::dotenv();
        envy::from_env().expect("failed to load environment (ADMIN_PASSWORD is required)")
    })
}
