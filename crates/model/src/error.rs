pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("model file not found: {0}")]
    ModelFileNotFound(String),

    #[error("model load failed: {0}")]
    LoadFailed(String),

    #[error("model load timed out")]
    LoadTimeout,

    #[error("model is busy")]
    Busy,

    #[error("model worker panicked")]
    WorkerPanicked,

    #[error("audio read failed: {0}")]
    Audio(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl Error {
    /// True for failures where the model never became usable, surfaced to
    /// callers as `model_unavailable`.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::ModelFileNotFound(_) | Error::LoadFailed(_) | Error::LoadTimeout
        )
    }
}
