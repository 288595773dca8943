use std::io;
use std::path::{Path, PathBuf};

use moji_transcript::OutputFormat;

/// Resolves the stable on-disk layout under the data root:
///
/// ```text
/// {data_root}/jobs/{job_id}/input/...
/// {data_root}/jobs/{job_id}/output/...
/// {data_root}/jobs/{job_id}/logs/process.log
/// {data_root}/staging/...
/// {data_root}/jobs.db
/// ```
#[derive(Debug, Clone)]
pub struct JobDirs {
    root: PathBuf,
}

impl JobDirs {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("jobs.db")
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root().join(job_id)
    }

    pub fn input_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("input")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    pub fn logs_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("logs")
    }

    pub fn source_path(&self, job_id: &str, ext: &str) -> PathBuf {
        self.input_dir(job_id).join(format!("source.{ext}"))
    }

    pub fn audio_path(&self, job_id: &str) -> PathBuf {
        self.input_dir(job_id).join("audio.wav")
    }

    pub fn artifact_path(&self, job_id: &str, format: OutputFormat) -> PathBuf {
        self.output_dir(job_id).join(format.file_name())
    }

    pub fn transcript_path(&self, job_id: &str) -> PathBuf {
        self.artifact_path(job_id, OutputFormat::Json)
    }

    pub fn process_log_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir(job_id).join("process.log")
    }

    /// Locates `input/source.*` regardless of the extension the acquirer
    /// ended up with.
    pub fn find_source(&self, job_id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(self.input_dir(job_id)).ok()?;
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_stem().and_then(|s| s.to_str()) == Some("source") && p.is_file()
            })
    }

    pub fn ensure_base_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.jobs_root())?;
        std::fs::create_dir_all(self.staging_dir())?;
        Ok(())
    }

    pub fn create_job_tree(&self, job_id: &str) -> io::Result<()> {
        std::fs::create_dir_all(self.input_dir(job_id))?;
        std::fs::create_dir_all(self.output_dir(job_id))?;
        std::fs::create_dir_all(self.logs_dir(job_id))?;
        Ok(())
    }

    /// Removes a job's directory tree. Missing trees are fine: deletion must
    /// be idempotent and tolerate partial prior cleanup.
    pub fn remove_job_tree(&self, job_id: &str) -> io::Result<()> {
        match std::fs::remove_dir_all(self.job_dir(job_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn job_tree_exists(&self, job_id: &str) -> bool {
        self.job_dir(job_id).is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let dirs = JobDirs::new("/data");
        assert_eq!(
            dirs.audio_path("JOB-ABC123"),
            PathBuf::from("/data/jobs/JOB-ABC123/input/audio.wav")
        );
        assert_eq!(
            dirs.artifact_path("JOB-ABC123", OutputFormat::Srt),
            PathBuf::from("/data/jobs/JOB-ABC123/output/result.srt")
        );
        assert_eq!(
            dirs.process_log_path("JOB-ABC123"),
            PathBuf::from("/data/jobs/JOB-ABC123/logs/process.log")
        );
        assert_eq!(dirs.db_path(), PathBuf::from("/data/jobs.db"));
    }

    #[test]
    fn create_and_remove_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(tmp.path());
        dirs.create_job_tree("JOB-XYZ789").unwrap();
        assert!(dirs.job_tree_exists("JOB-XYZ789"));

        std::fs::write(dirs.source_path("JOB-XYZ789", "mp4"), b"data").unwrap();
        assert_eq!(
            dirs.find_source("JOB-XYZ789").unwrap(),
            dirs.source_path("JOB-XYZ789", "mp4")
        );

        dirs.remove_job_tree("JOB-XYZ789").unwrap();
        assert!(!dirs.job_tree_exists("JOB-XYZ789"));
        // second removal is a no-op
        dirs.remove_job_tree("JOB-XYZ789").unwrap();
    }
}
