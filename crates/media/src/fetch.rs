use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::stderr_tail;

const STDERR_TAIL_LEN: usize = 400;

/// Wraps the external downloader. Given a URL, lands `source.{ext}` in the
/// job's input directory; the container extension is whatever the site
/// serves, and codec validation is left to the extractor.
#[derive(Debug, Clone)]
pub struct Fetcher {
    bin: PathBuf,
    max_filesize_mb: u64,
    fragment_retries: u32,
}

impl Fetcher {
    pub fn new(max_filesize_mb: u64) -> Self {
        Self {
            bin: PathBuf::from("yt-dlp"),
            max_filesize_mb,
            fragment_retries: 10,
        }
    }

    pub fn with_binary(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = bin.into();
        self
    }

    fn args(&self, url: &str, input_dir: &Path) -> Vec<String> {
        vec![
            "--no-playlist".to_string(),
            "--continue".to_string(),
            "--no-progress".to_string(),
            "--fragment-retries".to_string(),
            self.fragment_retries.to_string(),
            "--max-filesize".to_string(),
            format!("{}M", self.max_filesize_mb),
            "-f".to_string(),
            "bv*+ba/b".to_string(),
            "-o".to_string(),
            input_dir.join("source.%(ext)s").display().to_string(),
            url.to_string(),
        ]
    }

    /// Downloads `url` into `input_dir` as `source.{ext}` and returns the
    /// resulting path. Partial downloads left by a previous attempt are
    /// resumed by the tool itself.
    pub async fn fetch_url(&self, url: &str, input_dir: &Path) -> Result<PathBuf> {
        let args = self.args(url, input_dir);
        tracing::debug!(url = %url, "download_started");

        let output = Command::new(&self.bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                tool: "yt-dlp",
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Tool {
                tool: "yt-dlp",
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LEN),
            });
        }

        let source = find_source(input_dir)
            .ok_or_else(|| Error::EmptyOutput(input_dir.join("source.*").display().to_string()))?;

        let meta = tokio::fs::metadata(&source).await?;
        if meta.len() == 0 {
            return Err(Error::EmptyOutput(source.display().to_string()));
        }

        tracing::debug!(path = %source.display(), size_bytes = meta.len(), "download_finished");
        Ok(source)
    }
}

fn find_source(input_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(input_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_stem().and_then(|s| s.to_str()) == Some("source")
                && p.extension().and_then(|s| s.to_str()) != Some("part")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_size_cap_and_retry_budget() {
        let fetcher = Fetcher::new(2048);
        let args = fetcher.args("https://example.invalid/v", Path::new("/tmp/in"));
        assert!(args.contains(&"--max-filesize".to_string()));
        assert!(args.contains(&"2048M".to_string()));
        assert!(args.contains(&"--fragment-retries".to_string()));
        assert!(args.contains(&"--continue".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.invalid/v");
    }

    #[test]
    fn find_source_skips_partial_downloads() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("source.mp4.part"), b"partial").unwrap();
        assert!(find_source(tmp.path()).is_none());

        std::fs::write(tmp.path().join("source.webm"), b"done").unwrap();
        assert_eq!(
            find_source(tmp.path()).unwrap(),
            tmp.path().join("source.webm")
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(1).with_binary("/nonexistent/yt-dlp");
        let err = fetcher
            .fetch_url("https://example.invalid/v", tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { tool: "yt-dlp", .. }));
    }
}
