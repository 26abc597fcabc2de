use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("no api key found on watch page for {video_id}")]
    MissingApiKey { video_id: String },
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        operation: &'static str,
    },
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("persona {persona} returned no streaming data (status: {status})")]
    NoStreamingData { persona: String, status: String },
    #[error("hls manifest error: {0}")]
    HlsPlaylistError(String),
    #[error("script error: {0}")]
    ScriptError(String),
    #[error("no streams found")]
    NoStreamsFound,
    #[error("extraction timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("extraction cancelled")]
    Cancelled,
    #[error("other: {0}")]
    Other(String),
}

impl ExtractorError {
    pub fn http_status(status: u16, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Errors that abort an extraction before any persona is queried.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::MissingApiKey { .. })
    }
}
