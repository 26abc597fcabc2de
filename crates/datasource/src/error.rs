#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// The source was closed while the operation was in flight.
    #[error("data source closed")]
    Closed,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },

    #[error("read before open")]
    NotOpened,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DataSourceError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: u16, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Raised because the owner closed the source, not because I/O failed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Closed
            | Self::InvalidUrl { .. }
            | Self::InvalidRange { .. }
            | Self::NotOpened => false,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Network { .. } | Self::Io { .. } | Self::Internal { .. } => true,
        }
    }
}
