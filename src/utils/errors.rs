use thiserror::Error;

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    #[error("Server refused range request (status {status})")]
    RangeUnsupported { status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Cancellation is a caller decision, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Status codes that send short content down the full-download path.
    pub fn from_range_status(status: u16) -> Self {
        match status {
            403 | 416 => Self::RangeUnsupported { status },
            _ => Self::Http { status },
        }
    }

    pub fn is_range_unsupported(&self) -> bool {
        matches!(self, Self::RangeUnsupported { .. })
    }

    /// The URL was rejected before any request was made.
    pub fn is_invalid_url(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::UnsupportedScheme(_))
    }
}

impl From<tokio::time::error::Elapsed> for StreamError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
