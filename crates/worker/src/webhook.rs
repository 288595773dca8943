use std::collections::BTreeMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use moji_store::{Job, JobErrorObject};
use moji_transcript::OutputFormat;

use crate::log::JobLog;

const DEFAULT_ATTEMPTS: usize = 3;
const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Relative download URLs advertised in status payloads and webhook bodies.
pub fn download_urls(job_id: &str, formats: &[OutputFormat]) -> BTreeMap<String, String> {
    formats
        .iter()
        .map(|f| {
            (
                f.to_string(),
                format!("/api/jobs/{job_id}/download?format={f}"),
            )
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned {0}")]
    Retryable(u16),
    #[error("upstream returned {0}")]
    Permanent(u16),
}

impl DeliveryError {
    fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Permanent(_))
    }
}

/// Best-effort POST of terminal events. Runs after the terminal commit and
/// never feeds back into the job's state; exhaustion ends up in the job's
/// process log and the tracing stream.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    attempts: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            attempts: DEFAULT_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, attempts: usize, min_delay: Duration, max_delay: Duration) -> Self {
        self.attempts = attempts;
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub async fn notify_completed(&self, job: &Job, log: &JobLog) {
        let Some(url) = job.webhook_url.as_deref() else {
            return;
        };
        let payload = serde_json::json!({
            "event": "job.completed",
            "job_id": job.job_id,
            "status": "completed",
            "download_urls": download_urls(&job.job_id, &job.result_formats),
        });
        self.deliver(&job.job_id, url, payload, log).await;
    }

    pub async fn notify_failed(&self, job: &Job, error: &JobErrorObject, log: &JobLog) {
        let Some(url) = job.webhook_url.as_deref() else {
            return;
        };
        let payload = serde_json::json!({
            "event": "job.failed",
            "job_id": job.job_id,
            "status": "failed",
            "error": { "type": error.kind, "message": error.message },
        });
        self.deliver(&job.job_id, url, payload, log).await;
    }

    async fn deliver(&self, job_id: &str, url: &str, payload: serde_json::Value, log: &JobLog) {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts.saturating_sub(1));

        let send = || async {
            let response = self
                .client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if status.is_server_error() || status.as_u16() == 429 {
                Err(DeliveryError::Retryable(status.as_u16()))
            } else {
                Err(DeliveryError::Permanent(status.as_u16()))
            }
        };

        let result = send
            .retry(backoff)
            .when(DeliveryError::is_retryable)
            .notify(|err, dur| {
                tracing::warn!(
                    job_id = %job_id,
                    error = %err,
                    retry_delay_ms = dur.as_millis(),
                    "webhook_retrying"
                );
            })
            .await;

        match result {
            Ok(()) => {
                log.append(&format!("webhook delivered to {url}"));
                tracing::info!(job_id = %job_id, "webhook_delivered");
            }
            Err(e) => {
                log.append(&format!(
                    "webhook delivery to {url} gave up after {} attempt(s): {e}",
                    self.attempts
                ));
                tracing::error!(job_id = %job_id, error = %e, "webhook_exhausted");
            }
        }
    }
}
