mod format;

pub use format::{OutputFormat, render};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid transcript json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: u32,
    /// Seconds from the start of the audio.
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Canonical transcript as persisted in `output/transcript.json`.
///
/// Segments are ordered by `start`; every downstream artifact is a pure
/// function of this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: String,
    pub duration: f64,
    pub segments: Vec<TranscriptSegment>,
    pub text: String,
}

impl Transcript {
    pub fn new(
        language: impl Into<String>,
        duration: f64,
        segments: Vec<TranscriptSegment>,
    ) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            language: language.into(),
            duration,
            segments,
            text,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        Transcript::new(
            "ja",
            5.5,
            vec![
                TranscriptSegment {
                    id: 0,
                    start: 0.0,
                    end: 2.5,
                    text: "こんにちは。".to_string(),
                },
                TranscriptSegment {
                    id: 1,
                    start: 2.5,
                    end: 5.5,
                    text: "今日はいい天気ですね。".to_string(),
                },
            ],
        )
    }

    #[test]
    fn text_is_joined_from_segments() {
        let t = sample();
        assert_eq!(t.text, "こんにちは。\n今日はいい天気ですね。");
    }

    #[test]
    fn json_round_trip() {
        let t = sample();
        let parsed = Transcript::from_json(&t.to_json().unwrap()).unwrap();
        assert_eq!(parsed, t);
    }
}
