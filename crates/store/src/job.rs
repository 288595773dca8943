use chrono::{DateTime, Duration, Utc};
use moji_transcript::OutputFormat;
use rand::Rng;
use serde::{Deserialize, Serialize};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_SUFFIX_LEN: usize = 6;

/// `JOB-` followed by six uniformly random uppercase alphanumerics.
pub fn generate_job_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("JOB-{suffix}")
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Url,
    Upload,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Extracting,
    Transcribing,
    Formatting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Downloading => 1,
            JobStatus::Extracting => 2,
            JobStatus::Transcribing => 3,
            JobStatus::Formatting => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => 6,
        }
    }

    /// Forward edges of the status DAG. `failed` is reachable from every
    /// non-terminal node; a status may also re-assert itself for progress
    /// updates within a stage.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Failed {
            return true;
        }
        next == *self || next.rank() > self.rank()
    }
}

/// Structured error stored on a failed job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobErrorObject {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub source_kind: SourceKind,
    pub source_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub result_formats: Vec<OutputFormat>,
}

impl Job {
    pub fn new(
        source_kind: SourceKind,
        source_ref: impl Into<String>,
        webhook_url: Option<String>,
        retention_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: generate_job_id(),
            source_kind,
            source_ref: source_ref.into(),
            webhook_url,
            status: JobStatus::Queued,
            stage: JobStatus::Queued.to_string(),
            progress: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            expires_at: now + Duration::days(retention_days),
            error: None,
            duration_seconds: None,
            result_formats: Vec::new(),
        }
    }
}
