use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moji_store::{JobDirs, JobStore};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SweepStats {
    pub removed: u64,
    pub errors: u64,
}

impl SweepStats {
    pub fn to_json(&self) -> serde_json::Value {
        json!({ "removed": self.removed, "errors": self.errors })
    }
}

/// Deletes every job past its retention horizon: directory first, then row,
/// so a crash in between leaves a row the next sweep can finish off instead
/// of an orphaned tree.
pub fn sweep_once(store: &JobStore, dirs: &JobDirs) -> SweepStats {
    let mut stats = SweepStats::default();

    let expired = match store.expired(Utc::now()) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "retention_query_failed");
            stats.errors += 1;
            return stats;
        }
    };

    for job_id in expired {
        if let Err(e) = dirs.remove_job_tree(&job_id) {
            tracing::error!(job_id = %job_id, error = %e, "retention_tree_removal_failed");
            stats.errors += 1;
            continue;
        }
        match store.delete(&job_id) {
            Ok(()) => {
                stats.removed += 1;
                tracing::info!(job_id = %job_id, "job_expired_and_removed");
            }
            Err(moji_store::Error::NotFound(_)) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "retention_row_removal_failed");
                stats.errors += 1;
            }
        }
    }

    stats
}

pub fn spawn_retention_sweeper(
    store: Arc<JobStore>,
    dirs: JobDirs,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let stats = sweep_once(&store, &dirs);
                    if stats.removed > 0 || stats.errors > 0 {
                        tracing::info!(
                            removed = stats.removed,
                            errors = stats.errors,
                            "retention_sweep_finished"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use moji_store::{Job, SourceKind};

    #[test]
    fn sweep_removes_expired_rows_and_trees() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(tmp.path());
        dirs.ensure_base_dirs().unwrap();
        let store = JobStore::open_in_memory().unwrap();

        let mut expired = Job::new(SourceKind::Url, "https://example.invalid/a", None, 7);
        expired.expires_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert(&expired).unwrap();
        dirs.create_job_tree(&expired.job_id).unwrap();

        let alive = Job::new(SourceKind::Url, "https://example.invalid/b", None, 7);
        store.insert(&alive).unwrap();
        dirs.create_job_tree(&alive.job_id).unwrap();

        let stats = sweep_once(&store, &dirs);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.errors, 0);

        assert!(store.get(&expired.job_id).is_err());
        assert!(!dirs.job_tree_exists(&expired.job_id));
        assert!(store.get(&alive.job_id).is_ok());
        assert!(dirs.job_tree_exists(&alive.job_id));
    }

    #[test]
    fn sweep_tolerates_missing_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(tmp.path());
        dirs.ensure_base_dirs().unwrap();
        let store = JobStore::open_in_memory().unwrap();

        let mut expired = Job::new(SourceKind::Upload, "clip.wav", None, 7);
        expired.expires_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert(&expired).unwrap();
        // no directory was ever created

        let stats = sweep_once(&store, &dirs);
        assert_eq!(stats.removed, 1);
        assert!(store.get(&expired.job_id).is_err());
    }
}
