pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {stderr}")]
    Tool { tool: &'static str, stderr: String },

    #[error("output file missing or empty: {0}")]
    EmptyOutput(String),

    #[error("upload exceeds the configured maximum of {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },

    #[error("unparsable duration from ffprobe: {0:?}")]
    BadDuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short operator-facing message plus the longer details blob, matching
    /// the split stored on failed job rows.
    pub fn message_and_details(&self) -> (String, Option<String>) {
        match self {
            Error::Tool { tool, stderr } => {
                (format!("{tool} exited with an error"), Some(stderr.clone()))
            }
            other => (other.to_string(), None),
        }
    }
}
