use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::stderr_tail;

const STDERR_TAIL_LEN: usize = 400;

/// Converts any source container to the canonical audio form the model
/// expects: single channel, 16 000 Hz, 16-bit signed PCM little-endian.
#[derive(Debug, Clone)]
pub struct Extractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn ffmpeg_args(source: &Path, wav_out: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.display().to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            wav_out.display().to_string(),
        ]
    }

    /// Converts `source` to `wav_out` and returns the audio duration in
    /// seconds as probed from the converted file.
    pub async fn extract_audio(&self, source: &Path, wav_out: &Path) -> Result<f64> {
        let output = Command::new(&self.ffmpeg)
            .args(Self::ffmpeg_args(source, wav_out))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                tool: "ffmpeg",
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Tool {
                tool: "ffmpeg",
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LEN),
            });
        }

        let meta = tokio::fs::metadata(wav_out).await?;
        if meta.len() == 0 {
            return Err(Error::EmptyOutput(wav_out.display().to_string()));
        }

        let duration = self.probe_duration(wav_out).await?;
        tracing::debug!(
            path = %wav_out.display(),
            duration_seconds = duration,
            "audio_extracted"
        );
        Ok(duration)
    }

    pub async fn probe_duration(&self, media: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=nw=1:nk=1",
            ])
            .arg(media)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                tool: "ffprobe",
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Tool {
                tool: "ffprobe",
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LEN),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let first = text.lines().next().unwrap_or_default().trim();
        first
            .parse::<f64>()
            .map_err(|_| Error::BadDuration(first.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_args_produce_canonical_wav() {
        let args = Extractor::ffmpeg_args(Path::new("/in/source.mp4"), Path::new("/in/audio.wav"));
        let joined = args.join(" ");
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 16000"));
        assert!(joined.contains("-c:a pcm_s16le"));
        assert!(joined.contains("-vn"));
        assert!(joined.ends_with("/in/audio.wav"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let extractor = Extractor::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = extractor
            .extract_audio(Path::new("/in/a.mp4"), Path::new("/in/a.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { tool: "ffmpeg", .. }));
    }
}
