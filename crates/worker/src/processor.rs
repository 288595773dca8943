use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use moji_media::{Extractor, Fetcher};
use moji_model::{DecodeOptions, ModelLoader, ModelManager, Task, WhisperModel};
use moji_store::{Job, JobDirs, JobErrorObject, JobStatus, JobStore, SourceKind};
use moji_transcript::{OutputFormat, Transcript, TranscriptSegment};
use tokio::task::JoinHandle;

use crate::log::JobLog;
use crate::queue::{JobQueue, JobReceiver, QueuedJob};
use crate::signal::CompletionHub;
use crate::webhook::WebhookNotifier;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub stage_timeout: Duration,
    pub keep_source: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(60 * 60),
            keep_source: false,
        }
    }
}

/// Stage outcomes are values, not unwinds: a stage either advances the job,
/// fails it with a classified error, or discovers the job was deleted out
/// from under it and abandons without touching state.
enum StageFailure {
    Abandoned,
    Error(JobErrorObject),
}

type StageResult<T> = std::result::Result<T, StageFailure>;

/// Maps a stage-local fraction onto the job's overall progress so observers
/// see a single monotone 0-100 line across the whole pipeline.
fn stage_progress(status: JobStatus, frac: u8) -> u8 {
    let (base, span) = match status {
        JobStatus::Queued => (0u16, 0u16),
        JobStatus::Downloading => (0, 25),
        JobStatus::Extracting => (25, 25),
        JobStatus::Transcribing => (50, 40),
        JobStatus::Formatting => (90, 10),
        JobStatus::Completed => (100, 0),
        JobStatus::Failed => (0, 0),
    };
    (base + span * frac.min(100) as u16 / 100) as u8
}

fn stage_order(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued | JobStatus::Downloading => 1,
        JobStatus::Extracting => 2,
        JobStatus::Transcribing => 3,
        JobStatus::Formatting => 4,
        JobStatus::Completed | JobStatus::Failed => 5,
    }
}

/// The single worker. Exactly one instance runs per process; it drains the
/// queue in FIFO order and is the only writer of progress and terminal
/// states.
pub struct JobProcessor<M: ModelLoader = WhisperModel> {
    store: Arc<JobStore>,
    dirs: JobDirs,
    manager: ModelManager<M>,
    fetcher: Fetcher,
    extractor: Extractor,
    notifier: WebhookNotifier,
    completions: CompletionHub,
    config: ProcessorConfig,
}

impl<M: ModelLoader> JobProcessor<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        dirs: JobDirs,
        manager: ModelManager<M>,
        fetcher: Fetcher,
        extractor: Extractor,
        notifier: WebhookNotifier,
        completions: CompletionHub,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            dirs,
            manager,
            fetcher,
            extractor,
            notifier,
            completions,
            config,
        }
    }

    pub fn spawn(self, mut rx: JobReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("job_processor_started");
            while let Some(queued) = rx.recv().await {
                self.process(queued).await;
            }
            tracing::info!("job_processor_stopped");
        })
    }

    pub async fn process(&self, queued: QueuedJob) {
        let job_id = queued.job_id.clone();

        let job = match self.store.get(&job_id) {
            Ok(job) => job,
            Err(moji_store::Error::NotFound(_)) => {
                tracing::info!(job_id = %job_id, "job_gone_before_start");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "job_load_failed");
                return;
            }
        };

        if job.status.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "job_already_terminal");
            return;
        }

        if !self.dirs.job_tree_exists(&job_id) {
            let error = JobErrorObject::new("stale_storage", "job directory missing");
            self.finish_failed(&job_id, error, None).await;
            return;
        }

        let log = JobLog::new(self.dirs.process_log_path(&job_id));
        log.append(&format!("processing started from status={}", job.status));

        match self.run_stages(&job, &queued.decode, &log).await {
            Ok((duration, formats)) => self.finish_completed(&job_id, duration, formats, &log).await,
            Err(StageFailure::Abandoned) => {
                tracing::info!(job_id = %job_id, "job_abandoned");
            }
            Err(StageFailure::Error(error)) => {
                log.append(&format!("failed: {} ({})", error.message, error.kind));
                self.finish_failed(&job_id, error, Some(&log)).await;
            }
        }
    }

    async fn run_stages(
        &self,
        job: &Job,
        decode: &DecodeOptions,
        log: &JobLog,
    ) -> StageResult<(f64, Vec<OutputFormat>)> {
        let job_id = &job.job_id;
        let audio_path = self.dirs.audio_path(job_id);

        // resume from the last committed stage, degrading to an earlier one
        // when its input artifact is gone
        let mut start = stage_order(job.status);
        if start >= 4 && !self.dirs.transcript_path(job_id).is_file() {
            start = 3;
        }
        if start >= 3 && !audio_path.is_file() {
            start = 2;
        }
        let mut source_path = self.dirs.find_source(job_id);
        if start >= 2 && source_path.is_none() {
            start = 1;
        }

        if start < stage_order(job.status) {
            // a previous process died between the stage commit and its
            // artifact landing on disk; step the row back explicitly
            let resumed = match start {
                1 => JobStatus::Downloading,
                2 => JobStatus::Extracting,
                _ => JobStatus::Transcribing,
            };
            log.append(&format!(
                "restart: {} artifacts missing, re-entering {resumed}",
                job.status
            ));
            self.commit_resume(job_id, resumed)?;
        } else if start > 1 {
            log.append(&format!("restart: resuming from {}", job.status));
        }

        if start <= 1 {
            source_path = Some(self.stage_download(job, log).await?);
            self.check_alive(job_id)?;
        }

        let mut duration = job.duration_seconds;
        if start <= 2 {
            let source = source_path.ok_or_else(|| {
                StageFailure::Error(JobErrorObject::new(
                    "extract_error",
                    "source media missing before extraction",
                ))
            })?;
            duration = Some(self.stage_extract(job, &source, &audio_path, log).await?);
            self.check_alive(job_id)?;
        }

        let duration = match duration {
            Some(d) => d,
            // row predates the extract commit; re-probe the canonical wav
            None => self
                .extractor
                .probe_duration(&audio_path)
                .await
                .map_err(|e| {
                    StageFailure::Error(JobErrorObject::new("extract_error", e.to_string()))
                })?,
        };

        if start <= 3 {
            self.stage_transcribe(job, decode, &audio_path, duration, log)
                .await?;
            self.check_alive(job_id)?;
        }

        let formats = self.stage_format(job, log).await?;
        Ok((duration, formats))
    }

    async fn stage_download(&self, job: &Job, log: &JobLog) -> StageResult<PathBuf> {
        let job_id = &job.job_id;
        self.commit(job_id, JobStatus::Downloading, 0)?;
        log.append("stage downloading started");

        let source = match job.source_kind {
            SourceKind::Upload => self.dirs.find_source(job_id).ok_or_else(|| {
                StageFailure::Error(JobErrorObject::new(
                    "download_error",
                    "uploaded source missing from job directory",
                ))
            })?,
            SourceKind::Url => {
                let input_dir = self.dirs.input_dir(job_id);
                let fetch = self.fetcher.fetch_url(&job.source_ref, &input_dir);
                match tokio::time::timeout(self.config.stage_timeout, fetch).await {
                    Err(_) => return Err(stage_timeout_error("downloading", self.config.stage_timeout)),
                    Ok(Err(e)) => return Err(media_failure("download_error", e)),
                    Ok(Ok(path)) => path,
                }
            }
        };

        self.commit(job_id, JobStatus::Downloading, 100)?;
        log.append(&format!("stage downloading finished: {}", source.display()));
        Ok(source)
    }

    async fn stage_extract(
        &self,
        job: &Job,
        source: &std::path::Path,
        audio_path: &std::path::Path,
        log: &JobLog,
    ) -> StageResult<f64> {
        let job_id = &job.job_id;
        self.commit(job_id, JobStatus::Extracting, 0)?;
        log.append("stage extracting started");

        let extract = self.extractor.extract_audio(source, audio_path);
        let duration = match tokio::time::timeout(self.config.stage_timeout, extract).await {
            Err(_) => return Err(stage_timeout_error("extracting", self.config.stage_timeout)),
            Ok(Err(e)) => return Err(media_failure("extract_error", e)),
            Ok(Ok(duration)) => duration,
        };

        if let Err(e) = self.store.set_duration(job_id, duration) {
            if matches!(e, moji_store::Error::NotFound(_)) {
                return Err(StageFailure::Abandoned);
            }
            return Err(StageFailure::Error(JobErrorObject::new(
                "internal_error",
                e.to_string(),
            )));
        }

        self.commit(job_id, JobStatus::Extracting, 100)?;
        log.append(&format!("stage extracting finished: {duration:.2}s of audio"));
        Ok(duration)
    }

    async fn stage_transcribe(
        &self,
        job: &Job,
        decode: &DecodeOptions,
        audio_path: &std::path::Path,
        duration: f64,
        log: &JobLog,
    ) -> StageResult<()> {
        let job_id = &job.job_id;
        self.commit(job_id, JobStatus::Transcribing, 0)?;
        log.append("stage transcribing started");

        let run = async {
            match self.manager.transcribe(audio_path, decode).await {
                // a load that fell over gets one transparent retry before
                // the job is failed with model_unavailable
                Err(e) if e.is_unavailable() => {
                    log.append(&format!("model unavailable, retrying once: {e}"));
                    self.manager.transcribe(audio_path, decode).await
                }
                other => other,
            }
        };

        let segments = match tokio::time::timeout(self.config.stage_timeout, run).await {
            Err(_) => return Err(stage_timeout_error("transcribing", self.config.stage_timeout)),
            Ok(Err(e)) if e.is_unavailable() => {
                return Err(StageFailure::Error(JobErrorObject::new(
                    "model_unavailable",
                    e.to_string(),
                )));
            }
            Ok(Err(e)) => {
                return Err(StageFailure::Error(JobErrorObject::new(
                    "transcription_error",
                    e.to_string(),
                )));
            }
            Ok(Ok(segments)) => segments,
        };

        let language = match decode.task {
            Task::Translate => "en".to_string(),
            Task::Transcribe => decode.language.clone().unwrap_or_else(|| "ja".to_string()),
        };
        let segments = segments
            .into_iter()
            .enumerate()
            .map(|(i, s)| TranscriptSegment {
                id: i as u32,
                start: s.start,
                end: s.end,
                text: s.text,
            })
            .collect();
        let transcript = Transcript::new(language, duration, segments);

        transcript
            .save(&self.dirs.transcript_path(job_id))
            .map_err(|e| {
                StageFailure::Error(JobErrorObject::new("transcription_error", e.to_string()))
            })?;

        self.commit(job_id, JobStatus::Transcribing, 100)?;
        log.append(&format!(
            "stage transcribing finished: {} segment(s)",
            transcript.segments.len()
        ));
        Ok(())
    }

    async fn stage_format(&self, job: &Job, log: &JobLog) -> StageResult<Vec<OutputFormat>> {
        let job_id = &job.job_id;
        self.commit(job_id, JobStatus::Formatting, 0)?;
        log.append("stage formatting started");

        let transcript = Transcript::load(&self.dirs.transcript_path(job_id))
            .map_err(|e| StageFailure::Error(JobErrorObject::new("format_error", e.to_string())))?;

        let mut formats = vec![OutputFormat::Json];
        for format in [
            OutputFormat::Txt,
            OutputFormat::Srt,
            OutputFormat::Vtt,
            OutputFormat::Md,
        ] {
            let rendered = moji_transcript::render(&transcript, format).map_err(|e| {
                StageFailure::Error(JobErrorObject::new("format_error", e.to_string()))
            })?;
            std::fs::write(self.dirs.artifact_path(job_id, format), rendered).map_err(|e| {
                StageFailure::Error(JobErrorObject::new("format_error", e.to_string()))
            })?;
            formats.push(format);
        }

        self.commit(job_id, JobStatus::Formatting, 100)?;
        log.append("stage formatting finished");
        Ok(formats)
    }

    async fn finish_completed(
        &self,
        job_id: &str,
        duration: f64,
        formats: Vec<OutputFormat>,
        log: &JobLog,
    ) {
        // the canonical wav is an intermediate; drop it (and the source,
        // unless configured to keep) before advertising completion
        let _ = tokio::fs::remove_file(self.dirs.audio_path(job_id)).await;
        if !self.config.keep_source {
            if let Some(source) = self.dirs.find_source(job_id) {
                let _ = tokio::fs::remove_file(source).await;
            }
        }

        if let Err(e) = self.store.mark_completed(job_id, duration, &formats) {
            tracing::error!(job_id = %job_id, error = %e, "mark_completed_failed");
            return;
        }
        log.append("completed");
        tracing::info!(job_id = %job_id, duration_seconds = duration, "job_completed");
        self.completions.publish(job_id, JobStatus::Completed);

        if let Ok(job) = self.store.get(job_id) {
            let notifier = self.notifier.clone();
            let log = log.clone();
            tokio::spawn(async move {
                notifier.notify_completed(&job, &log).await;
            });
        }
    }

    async fn finish_failed(&self, job_id: &str, error: JobErrorObject, log: Option<&JobLog>) {
        match self.store.mark_failed(job_id, &error) {
            Ok(()) => {}
            Err(moji_store::Error::NotFound(_)) => return,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "mark_failed_failed");
                return;
            }
        }
        tracing::warn!(job_id = %job_id, kind = %error.kind, message = %error.message, "job_failed");
        self.completions.publish(job_id, JobStatus::Failed);

        if let Ok(job) = self.store.get(job_id) {
            let notifier = self.notifier.clone();
            let log = log
                .cloned()
                .unwrap_or_else(|| JobLog::new(self.dirs.process_log_path(job_id)));
            let error = job
                .error
                .clone()
                .unwrap_or_else(|| JobErrorObject::new("internal_error", "unknown failure"));
            tokio::spawn(async move {
                notifier.notify_failed(&job, &error, &log).await;
            });
        }
    }

    fn commit(&self, job_id: &str, status: JobStatus, frac: u8) -> StageResult<()> {
        let stage = status.to_string();
        match self
            .store
            .update_progress(job_id, status, &stage, stage_progress(status, frac))
        {
            Ok(()) => Ok(()),
            Err(moji_store::Error::NotFound(_)) => Err(StageFailure::Abandoned),
            Err(e @ moji_store::Error::IllegalTransition { .. }) => {
                // guard tripping here is a bug in the pipeline, not user error
                tracing::error!(job_id = %job_id, error = %e, "illegal_transition");
                Err(StageFailure::Error(JobErrorObject::new(
                    "illegal_transition",
                    e.to_string(),
                )))
            }
            Err(e) => Err(StageFailure::Error(JobErrorObject::new(
                "internal_error",
                e.to_string(),
            ))),
        }
    }

    fn commit_resume(&self, job_id: &str, status: JobStatus) -> StageResult<()> {
        let stage = status.to_string();
        match self
            .store
            .resume_to(job_id, status, &stage, stage_progress(status, 0))
        {
            Ok(()) => Ok(()),
            Err(moji_store::Error::NotFound(_)) => Err(StageFailure::Abandoned),
            Err(e) => Err(StageFailure::Error(JobErrorObject::new(
                "internal_error",
                e.to_string(),
            ))),
        }
    }

    fn check_alive(&self, job_id: &str) -> StageResult<()> {
        if !self.dirs.job_tree_exists(job_id) {
            return Err(StageFailure::Abandoned);
        }
        match self.store.get(job_id) {
            Ok(_) => Ok(()),
            Err(moji_store::Error::NotFound(_)) => Err(StageFailure::Abandoned),
            Err(e) => Err(StageFailure::Error(JobErrorObject::new(
                "internal_error",
                e.to_string(),
            ))),
        }
    }
}

fn stage_timeout_error(stage: &str, timeout: Duration) -> StageFailure {
    StageFailure::Error(JobErrorObject::new(
        "timeout",
        format!("{stage} exceeded its {}s budget", timeout.as_secs()),
    ))
}

fn media_failure(kind: &str, error: moji_media::Error) -> StageFailure {
    let (message, details) = error.message_and_details();
    let mut object = JobErrorObject::new(kind, message);
    if let Some(details) = details {
        object = object.with_details(serde_json::json!({ "stderr": details }));
    }
    StageFailure::Error(object)
}

/// Restart reconciliation: rows whose directory vanished are failed with
/// `stale_storage`; rows with a consistent directory are re-queued for
/// resumption. Returns (requeued, failed).
pub fn startup_sweep(store: &JobStore, dirs: &JobDirs, queue: &JobQueue) -> (u64, u64) {
    let jobs = match store.non_terminal() {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "startup_sweep_query_failed");
            return (0, 0);
        }
    };

    let mut requeued = 0;
    let mut failed = 0;
    for job in jobs {
        if !dirs.job_tree_exists(&job.job_id) {
            let error = JobErrorObject::new("stale_storage", "job directory missing after restart");
            if let Err(e) = store.mark_failed(&job.job_id, &error) {
                tracing::error!(job_id = %job.job_id, error = %e, "startup_mark_failed_failed");
            } else {
                failed += 1;
            }
            continue;
        }
        match queue.enqueue(QueuedJob::new(&job.job_id)) {
            Ok(()) => requeued += 1,
            Err(_) => {
                tracing::warn!(job_id = %job.job_id, "startup_requeue_skipped_queue_full");
            }
        }
    }

    if requeued > 0 || failed > 0 {
        tracing::info!(requeued, failed, "startup_sweep_finished");
    }
    (requeued, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job_queue;
    use moji_model::ModelSegment;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    struct MockModel;

    impl ModelLoader for MockModel {
        fn load(_model_id: &str) -> moji_model::Result<Self> {
            Ok(MockModel)
        }

        fn transcribe(
            &self,
            _audio_path: &Path,
            _options: &DecodeOptions,
        ) -> moji_model::Result<Vec<ModelSegment>> {
            Ok(vec![
                ModelSegment {
                    start: 0.0,
                    end: 1.8,
                    text: "こんにちは。".into(),
                },
                ModelSegment {
                    start: 1.8,
                    end: 3.5,
                    text: "テストです。".into(),
                },
            ])
        }
    }

    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        store: Arc<JobStore>,
        dirs: JobDirs,
        processor: JobProcessor<MockModel>,
        completions: CompletionHub,
    }

    fn harness(notifier: WebhookNotifier) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(tmp.path().join("data"));
        dirs.ensure_base_dirs().unwrap();
        let store = Arc::new(JobStore::open_in_memory().unwrap());

        let tools = tmp.path().join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        // writes a non-empty file at its last argument, like ffmpeg would
        let ffmpeg = fake_tool(
            &tools,
            "ffmpeg",
            r#"for a in "$@"; do out="$a"; done; echo audio > "$out""#,
        );
        let ffprobe = fake_tool(&tools, "ffprobe", "echo 3.5");

        let manager = ModelManager::<MockModel>::builder("mock")
            .idle_timeout(Duration::from_secs(600))
            .check_interval(Duration::from_secs(600))
            .build();

        let completions = CompletionHub::new();
        let processor = JobProcessor::new(
            Arc::clone(&store),
            dirs.clone(),
            manager,
            Fetcher::new(1024),
            Extractor::with_binaries(ffmpeg, ffprobe),
            notifier,
            completions.clone(),
            ProcessorConfig::default(),
        );

        Harness {
            _tmp: tmp,
            store,
            dirs,
            processor,
            completions,
        }
    }

    fn staged_upload_job(h: &Harness, webhook_url: Option<String>) -> Job {
        let job = Job::new(SourceKind::Upload, "clip.wav", webhook_url, 7);
        h.store.insert(&job).unwrap();
        h.dirs.create_job_tree(&job.job_id).unwrap();
        std::fs::write(h.dirs.source_path(&job.job_id, "wav"), b"fake media bytes").unwrap();
        job
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn upload_job_runs_to_completion() {
        let h = harness(WebhookNotifier::new());
        let job = staged_upload_job(&h, None);

        h.processor.process(QueuedJob::new(&job.job_id)).await;

        let done = h.store.get(&job.job_id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.duration_seconds, Some(3.5));
        assert_eq!(done.result_formats.len(), 5);
        assert!(done.completed_at.is_some());
        assert!(done.failed_at.is_none());

        // artifacts on disk match the advertised formats
        for format in &done.result_formats {
            assert!(h.dirs.artifact_path(&job.job_id, *format).is_file());
        }
        // the intermediate wav and the source are gone
        assert!(!h.dirs.audio_path(&job.job_id).exists());
        assert!(h.dirs.find_source(&job.job_id).is_none());

        let transcript = Transcript::load(&h.dirs.transcript_path(&job.job_id)).unwrap();
        assert_eq!(transcript.language, "ja");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.duration, 3.5);

        let srt = std::fs::read_to_string(h.dirs.artifact_path(&job.job_id, OutputFormat::Srt))
            .unwrap();
        assert!(srt.starts_with("1\n"));

        let log = std::fs::read_to_string(h.dirs.process_log_path(&job.job_id)).unwrap();
        assert!(log.contains("stage transcribing finished"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completion_signal_is_published() {
        let h = harness(WebhookNotifier::new());
        let job = staged_upload_job(&h, None);

        // the ticket is taken before the job reaches the worker, mirroring
        // the synchronous handler's admission order
        let ticket = h.completions.subscribe(&job.job_id);

        h.processor.process(QueuedJob::new(&job.job_id)).await;
        assert_eq!(
            ticket.wait(Duration::from_secs(10)).await,
            Some(JobStatus::Completed)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_upload_source_fails_with_download_error() {
        let h = harness(WebhookNotifier::new());
        let job = Job::new(SourceKind::Upload, "clip.wav", None, 7);
        h.store.insert(&job).unwrap();
        h.dirs.create_job_tree(&job.job_id).unwrap();
        // no source staged

        h.processor.process(QueuedJob::new(&job.job_id)).await;

        let failed = h.store.get(&job.job_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.unwrap().kind, "download_error");
        assert!(failed.failed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_directory_is_stale_storage() {
        let h = harness(WebhookNotifier::new());
        let job = Job::new(SourceKind::Url, "https://example.invalid/v", None, 7);
        h.store.insert(&job).unwrap();
        // directory never created

        h.processor.process(QueuedJob::new(&job.job_id)).await;

        let failed = h.store.get(&job.job_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.unwrap().kind, "stale_storage");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deleted_job_is_skipped_silently() {
        let h = harness(WebhookNotifier::new());
        h.processor.process(QueuedJob::new("JOB-GONE00")).await;
        assert!(h.store.get("JOB-GONE00").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn webhook_failure_does_not_affect_completion() {
        // a webhook sink that always returns 500
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/hook",
            axum::routing::post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new().with_backoff(
            3,
            Duration::from_millis(10),
            Duration::from_millis(30),
        );
        let h = harness(notifier);
        let job = staged_upload_job(&h, Some(format!("http://{addr}/hook")));

        h.processor.process(QueuedJob::new(&job.job_id)).await;

        let done = h.store.get(&job.job_id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        // exhaustion lands in the per-job log without touching the row
        let log_path = h.dirs.process_log_path(&job.job_id);
        let mut exhausted = false;
        for _ in 0..100 {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            if log.contains("gave up") {
                exhausted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(exhausted, "webhook exhaustion never logged");
        assert_eq!(h.store.get(&job.job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_sweep_requeues_and_fails() {
        let h = harness(WebhookNotifier::new());

        let resumable = staged_upload_job(&h, None);
        h.store
            .update_progress(&resumable.job_id, JobStatus::Downloading, "downloading", 10)
            .unwrap();

        let stale = Job::new(SourceKind::Url, "https://example.invalid/v", None, 7);
        h.store.insert(&stale).unwrap();

        let (queue, mut rx) = job_queue(8);
        let (requeued, failed) = startup_sweep(&h.store, &h.dirs, &queue);
        assert_eq!(requeued, 1);
        assert_eq!(failed, 1);

        assert_eq!(rx.recv().await.unwrap().job_id, resumable.job_id);
        assert_eq!(
            h.store.get(&stale.job_id).unwrap().error.unwrap().kind,
            "stale_storage"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interrupted_transcription_resumes_via_extracting() {
        let h = harness(WebhookNotifier::new());
        let job = staged_upload_job(&h, None);

        // a previous process committed up to transcribing, then died before
        // (or after losing) the canonical wav
        h.store
            .update_progress(&job.job_id, JobStatus::Downloading, "downloading", 25)
            .unwrap();
        h.store
            .update_progress(&job.job_id, JobStatus::Extracting, "extracting", 50)
            .unwrap();
        h.store
            .update_progress(&job.job_id, JobStatus::Transcribing, "transcribing", 50)
            .unwrap();
        assert!(!h.dirs.audio_path(&job.job_id).exists());

        h.processor.process(QueuedJob::new(&job.job_id)).await;

        let done = h.store.get(&job.job_id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error.is_none());
        assert_eq!(done.duration_seconds, Some(3.5));
        assert_eq!(done.progress, 100);

        let log = std::fs::read_to_string(h.dirs.process_log_path(&job.job_id)).unwrap();
        assert!(log.contains("re-entering extracting"));
        assert!(log.contains("stage extracting finished"));
    }

    #[test]
    fn overall_progress_is_monotone_across_stages() {
        let path = [
            (JobStatus::Queued, 0),
            (JobStatus::Downloading, 0),
            (JobStatus::Downloading, 100),
            (JobStatus::Extracting, 0),
            (JobStatus::Extracting, 100),
            (JobStatus::Transcribing, 0),
            (JobStatus::Transcribing, 50),
            (JobStatus::Transcribing, 100),
            (JobStatus::Formatting, 0),
            (JobStatus::Formatting, 100),
            (JobStatus::Completed, 0),
        ];
        let mut last = 0;
        for (status, frac) in path {
            let p = stage_progress(status, frac);
            assert!(p >= last, "{status} at {frac} regressed: {p} < {last}");
            last = p;
        }
        assert_eq!(last, 100);
    }
}
