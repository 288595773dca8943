use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

/// Appender for a job's `logs/process.log`. Logging must never fail the
/// pipeline, so write errors are downgraded to warnings.
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, line: &str) {
        let stamped = format!("{} {}\n", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), line);
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(stamped.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "process_log_write_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_timestamped_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let log = JobLog::new(tmp.path().join("process.log"));
        log.append("stage downloading started");
        log.append("stage downloading finished");

        let content = std::fs::read_to_string(tmp.path().join("process.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("stage downloading started"));
        assert!(lines[1].contains('T'));
    }

    #[test]
    fn missing_directory_does_not_panic() {
        let log = JobLog::new("/nonexistent/dir/process.log");
        log.append("still fine");
    }
}
