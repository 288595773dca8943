mod error;
mod manager;
pub mod whisper;

pub use error::{Error, Result};
pub use manager::{ModelManager, ModelManagerBuilder, ModelStatus, SlotState};
pub use whisper::WhisperModel;

use std::path::Path;

/// Decode task selected per request. The compatible translation endpoint
/// constrains the decoder to English output; everything else transcribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

/// Opaque decode tuning bundle handed to the model. The native surface
/// always submits the Japanese bundle; the compatible surface may override
/// language and temperature without re-tuning the rest.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub language: Option<String>,
    pub task: Task,
    pub temperature: Option<f32>,
    pub initial_prompt: Option<String>,
}

impl DecodeOptions {
    pub fn japanese() -> Self {
        Self {
            language: Some("ja".to_string()),
            ..Default::default()
        }
    }
}

/// One decoded segment in model-native shape; start/end in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A loadable speech model. The manager is generic over this so tests run
/// against a mock instead of a multi-gigabyte checkpoint.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(model_id: &str) -> Result<Self>
    where
        Self: Sized;

    fn transcribe(&self, audio_path: &Path, options: &DecodeOptions) -> Result<Vec<ModelSegment>>;
}
