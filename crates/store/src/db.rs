use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use moji_transcript::OutputFormat;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::job::{Job, JobErrorObject, JobStatus, SourceKind};

/// Durable registry of job rows. A single connection behind a mutex
/// serializes every mutation, which satisfies the per-row ordering the
/// pipeline relies on.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                source_kind TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                webhook_url TEXT,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER,
                failed_at INTEGER,
                expires_at INTEGER NOT NULL,
                error_json TEXT,
                duration_seconds REAL,
                result_formats TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_jobs_expires_at ON jobs(expires_at);
            "#,
        )?;
        Ok(())
    }

    pub fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let result = conn.execute(
            r#"
            INSERT INTO jobs (
                job_id, source_kind, source_ref, webhook_url, status, stage,
                progress, created_at, updated_at, completed_at, failed_at,
                expires_at, error_json, duration_seconds, result_formats
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            rusqlite::params![
                job.job_id,
                job.source_kind.to_string(),
                job.source_ref,
                job.webhook_url,
                job.status.to_string(),
                job.stage,
                job.progress as i64,
                job.created_at.timestamp_millis(),
                job.updated_at.timestamp_millis(),
                job.completed_at.map(|t| t.timestamp_millis()),
                job.failed_at.map(|t| t.timestamp_millis()),
                job.expires_at.timestamp_millis(),
                job.error
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.duration_seconds,
                serde_json::to_string(&job.result_formats)?,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateId(job.job_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        get_row(&conn, job_id)
    }

    pub fn list(&self, status: Option<JobStatus>, limit: u32, offset: u32) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("job store mutex poisoned");

        let (sql, params): (&str, Vec<Box<dyn rusqlite::ToSql>>) = match status {
            Some(s) => (
                "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                vec![
                    Box::new(s.to_string()),
                    Box::new(limit as i64),
                    Box::new(offset as i64),
                ],
            ),
            None => (
                "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                vec![Box::new(limit as i64), Box::new(offset as i64)],
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_job_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(finish_job_row(row?)?);
        }
        Ok(jobs)
    }

    /// Commits a stage transition. The new status must be reachable from the
    /// current one; progress never moves backwards.
    pub fn update_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        stage: &str,
        progress: u8,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let current = get_row(&conn, job_id)?;

        if !current.status.can_transition_to(status) {
            return Err(Error::IllegalTransition {
                from: current.status,
                to: status,
            });
        }

        let progress = progress.min(100).max(current.progress);
        conn.execute(
            "UPDATE jobs SET status = ?1, stage = ?2, progress = ?3, updated_at = ?4 WHERE job_id = ?5",
            rusqlite::params![
                status.to_string(),
                stage,
                progress as i64,
                Utc::now().timestamp_millis(),
                job_id,
            ],
        )?;
        Ok(())
    }

    /// Restart-recovery commit. A resume that finds a stage's input artifact
    /// gone re-enters an earlier stage, the one sanctioned backward move in
    /// the status graph; `update_progress` stays forward-only for everything
    /// else. Terminal rows remain immutable and observed progress still
    /// never decreases.
    pub fn resume_to(
        &self,
        job_id: &str,
        status: JobStatus,
        stage: &str,
        progress: u8,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let current = get_row(&conn, job_id)?;

        if current.status.is_terminal() || status.is_terminal() {
            return Err(Error::IllegalTransition {
                from: current.status,
                to: status,
            });
        }

        let progress = progress.min(100).max(current.progress);
        conn.execute(
            "UPDATE jobs SET status = ?1, stage = ?2, progress = ?3, updated_at = ?4 WHERE job_id = ?5",
            rusqlite::params![
                status.to_string(),
                stage,
                progress as i64,
                Utc::now().timestamp_millis(),
                job_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_duration(&self, job_id: &str, duration_seconds: f64) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let affected = conn.execute(
            "UPDATE jobs SET duration_seconds = ?1, updated_at = ?2 WHERE job_id = ?3",
            rusqlite::params![
                duration_seconds,
                Utc::now().timestamp_millis(),
                job_id
            ],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Terminal write. A second call on an already-completed row is a no-op;
    /// completing a failed row is an illegal transition.
    pub fn mark_completed(
        &self,
        job_id: &str,
        duration_seconds: f64,
        result_formats: &[OutputFormat],
    ) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let current = get_row(&conn, job_id)?;

        match current.status {
            JobStatus::Completed => return Ok(()),
            JobStatus::Failed => {
                return Err(Error::IllegalTransition {
                    from: current.status,
                    to: JobStatus::Completed,
                });
            }
            _ => {}
        }

        let now = Utc::now().timestamp_millis();
        conn.execute(
            r#"
            UPDATE jobs SET
                status = 'completed', stage = 'completed', progress = 100,
                completed_at = ?1, updated_at = ?1,
                duration_seconds = ?2, result_formats = ?3
            WHERE job_id = ?4
            "#,
            rusqlite::params![
                now,
                duration_seconds,
                serde_json::to_string(result_formats)?,
                job_id,
            ],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, job_id: &str, error: &JobErrorObject) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let current = get_row(&conn, job_id)?;

        match current.status {
            JobStatus::Failed => return Ok(()),
            JobStatus::Completed => {
                return Err(Error::IllegalTransition {
                    from: current.status,
                    to: JobStatus::Failed,
                });
            }
            _ => {}
        }

        let now = Utc::now().timestamp_millis();
        conn.execute(
            r#"
            UPDATE jobs SET
                status = 'failed', stage = 'failed',
                failed_at = ?1, updated_at = ?1, error_json = ?2
            WHERE job_id = ?3
            "#,
            rusqlite::params![now, serde_json::to_string(error)?, job_id],
        )?;
        Ok(())
    }

    pub fn delete(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let affected = conn.execute("DELETE FROM jobs WHERE job_id = ?1", [job_id])?;
        if affected == 0 {
            return Err(Error::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let mut stmt = conn.prepare("SELECT job_id FROM jobs WHERE expires_at < ?1")?;
        let rows = stmt.query_map([now.timestamp_millis()], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn non_terminal(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status NOT IN ('completed', 'failed') ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], map_job_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(finish_job_row(row?)?);
        }
        Ok(jobs)
    }

    pub fn counts(&self) -> Result<HashMap<String, u64>> {
        let conn = self.conn.lock().expect("job store mutex poisoned");
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        Ok(counts)
    }
}

/// Column values that need post-processing outside rusqlite's error type.
struct RawJobRow {
    job: Job,
    error_json: Option<String>,
    result_formats: String,
}

fn get_row(conn: &Connection, job_id: &str) -> Result<Job> {
    let raw = conn
        .query_row("SELECT * FROM jobs WHERE job_id = ?1", [job_id], map_job_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(job_id.to_string()),
            other => Error::Database(other),
        })?;
    finish_job_row(raw)
}

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJobRow> {
    let status_str: String = row.get("status")?;
    let source_kind_str: String = row.get("source_kind")?;

    let job = Job {
        job_id: row.get("job_id")?,
        source_kind: SourceKind::from_str(&source_kind_str).unwrap_or(SourceKind::Url),
        source_ref: row.get("source_ref")?,
        webhook_url: row.get("webhook_url")?,
        status: JobStatus::from_str(&status_str).unwrap_or(JobStatus::Failed),
        stage: row.get("stage")?,
        progress: row.get::<_, i64>("progress")? as u8,
        created_at: millis_to_datetime(row.get("created_at")?),
        updated_at: millis_to_datetime(row.get("updated_at")?),
        completed_at: row
            .get::<_, Option<i64>>("completed_at")?
            .map(millis_to_datetime),
        failed_at: row
            .get::<_, Option<i64>>("failed_at")?
            .map(millis_to_datetime),
        expires_at: millis_to_datetime(row.get("expires_at")?),
        error: None,
        duration_seconds: row.get("duration_seconds")?,
        result_formats: Vec::new(),
    };

    Ok(RawJobRow {
        job,
        error_json: row.get("error_json")?,
        result_formats: row.get("result_formats")?,
    })
}

fn finish_job_row(raw: RawJobRow) -> Result<Job> {
    let mut job = raw.job;
    if let Some(json) = raw.error_json {
        job.error = Some(serde_json::from_str(&json)?);
    }
    job.result_formats = serde_json::from_str(&raw.result_formats)?;
    Ok(job)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SourceKind;

    fn store() -> JobStore {
        JobStore::open_in_memory().unwrap()
    }

    fn queued_job() -> Job {
        Job::new(SourceKind::Url, "https://example.invalid/clip.mp4", None, 7)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        let loaded = store.get(&job.job_id).unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.source_ref, job.source_ref);
        assert!(loaded.result_formats.is_empty());
    }

    #[test]
    fn insert_duplicate_id_is_rejected() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();
        match store.insert(&job) {
            Err(Error::DuplicateId(id)) => assert_eq!(id, job.job_id),
            other => panic!("expected DuplicateId, got {other:?}"),
        }
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get("JOB-NOPE00"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        store
            .update_progress(&job.job_id, JobStatus::Downloading, "downloading", 0)
            .unwrap();
        store
            .update_progress(&job.job_id, JobStatus::Extracting, "extracting", 30)
            .unwrap();

        match store.update_progress(&job.job_id, JobStatus::Downloading, "downloading", 0) {
            Err(Error::IllegalTransition { from, to }) => {
                assert_eq!(from, JobStatus::Extracting);
                assert_eq!(to, JobStatus::Downloading);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
    }

    #[test]
    fn resume_to_allows_backward_recovery() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        store
            .update_progress(&job.job_id, JobStatus::Downloading, "downloading", 0)
            .unwrap();
        store
            .update_progress(&job.job_id, JobStatus::Extracting, "extracting", 25)
            .unwrap();
        store
            .update_progress(&job.job_id, JobStatus::Transcribing, "transcribing", 50)
            .unwrap();

        store
            .resume_to(&job.job_id, JobStatus::Extracting, "extracting", 25)
            .unwrap();

        let row = store.get(&job.job_id).unwrap();
        assert_eq!(row.status, JobStatus::Extracting);
        // progress stays monotone even though the status stepped back
        assert_eq!(row.progress, 50);

        // terminal rows are still protected
        store
            .mark_completed(&job.job_id, 1.0, &[OutputFormat::Json])
            .unwrap();
        assert!(matches!(
            store.resume_to(&job.job_id, JobStatus::Extracting, "extracting", 25),
            Err(Error::IllegalTransition { .. })
        ));
    }

    #[test]
    fn progress_never_decreases() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        store
            .update_progress(&job.job_id, JobStatus::Downloading, "downloading", 40)
            .unwrap();
        store
            .update_progress(&job.job_id, JobStatus::Downloading, "downloading", 10)
            .unwrap();

        assert_eq!(store.get(&job.job_id).unwrap().progress, 40);
    }

    #[test]
    fn terminal_writes_are_idempotent() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        store
            .mark_completed(&job.job_id, 12.5, &[OutputFormat::Json, OutputFormat::Txt])
            .unwrap();
        let first = store.get(&job.job_id).unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.progress, 100);
        let completed_at = first.completed_at.unwrap();

        store.mark_completed(&job.job_id, 99.0, &[]).unwrap();
        let second = store.get(&job.job_id).unwrap();
        assert_eq!(second.completed_at.unwrap(), completed_at);
        assert_eq!(second.duration_seconds, Some(12.5));

        // completed -> failed is illegal
        let err = JobErrorObject::new("internal_error", "boom");
        assert!(matches!(
            store.mark_failed(&job.job_id, &err),
            Err(Error::IllegalTransition { .. })
        ));
    }

    #[test]
    fn mark_failed_records_error_object() {
        let store = store();
        let job = queued_job();
        store.insert(&job).unwrap();

        let err = JobErrorObject::new("download_error", "yt-dlp exited 1")
            .with_details(serde_json::json!({"stderr": "403 Forbidden"}));
        store.mark_failed(&job.job_id, &err).unwrap();

        let loaded = store.get(&job.job_id).unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert!(loaded.failed_at.is_some());
        assert!(loaded.completed_at.is_none());
        assert_eq!(loaded.error.unwrap(), err);
    }

    #[test]
    fn expired_returns_only_past_horizon() {
        let store = store();
        let mut old = queued_job();
        old.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.insert(&old).unwrap();

        let fresh = queued_job();
        store.insert(&fresh).unwrap();

        let expired = store.expired(Utc::now()).unwrap();
        assert_eq!(expired, vec![old.job_id]);
    }

    #[test]
    fn list_filters_and_paginates() {
        let store = store();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let job = queued_job();
            ids.push(job.job_id.clone());
            store.insert(&job).unwrap();
        }
        store
            .update_progress(&ids[0], JobStatus::Downloading, "downloading", 0)
            .unwrap();

        let queued = store.list(Some(JobStatus::Queued), 10, 0).unwrap();
        assert_eq!(queued.len(), 4);

        let page = store.list(None, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        let rest = store.list(None, 10, 2).unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn counts_groups_by_status() {
        let store = store();
        for _ in 0..3 {
            store.insert(&queued_job()).unwrap();
        }
        let job = queued_job();
        store.insert(&job).unwrap();
        store
            .mark_completed(&job.job_id, 1.0, &[OutputFormat::Json])
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.get("queued"), Some(&3));
        assert_eq!(counts.get("completed"), Some(&1));
    }

    #[test]
    fn non_terminal_skips_finished_jobs() {
        let store = store();
        let running = queued_job();
        store.insert(&running).unwrap();

        let done = queued_job();
        store.insert(&done).unwrap();
        store
            .mark_completed(&done.job_id, 1.0, &[OutputFormat::Json])
            .unwrap();

        let open = store.non_terminal().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].job_id, running.job_id);
    }
}
