use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Streams an upload to disk chunk by chunk, enforcing the configured size
/// cap without ever holding the whole payload in memory. The file is written
/// to a staging path; callers promote it into a job directory only after a
/// row exists.
pub struct UploadSink {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl UploadSink {
    pub async fn create(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            written: 0,
            max_bytes,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.written += chunk.len() as u64;
        if self.written > self.max_bytes {
            return Err(Error::TooLarge {
                max_bytes: self.max_bytes,
            });
        }
        self.file.write_all(chunk).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<(PathBuf, u64)> {
        if self.written == 0 {
            return Err(Error::EmptyOutput(self.path.display().to_string()));
        }
        self.file.flush().await?;
        Ok((self.path, self.written))
    }

    /// Best-effort removal of the staged file after a rejected upload.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged upload");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
