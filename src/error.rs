use std::sync::Arc;

/// Represents a result type for operations in the Statsig core.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// statsig-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Statsig core.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The caller did not supply any usable user identifier (no `user_id` and no custom IDs).
    #[error("user must have a userID or at least one customID")]
    MissingUserIdentifier,

    /// The caller supplied an event that cannot be logged (e.g., empty event name).
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Invalid URL configuration for one of the endpoints.
    #[error("invalid endpoint url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid SDK key.
    #[error("unauthorized, sdk key is likely invalid")]
    Unauthorized,

    /// The server returned a non-2xx status code.
    #[error("request failed with status {0}")]
    RequestFailed(u16),

    /// The ruleset document failed to parse.
    #[error("failed to parse specs response")]
    SpecsParseError(#[source] Arc<serde_json::Error>),

    /// The ruleset document was rejected (stale `time`, key fingerprint mismatch).
    #[error("specs response rejected: {0}")]
    SpecsRejected(&'static str),

    /// All configured sources failed to populate the store at initialize.
    #[error("no configuration source succeeded at initialize")]
    NoSourceAvailable,

    /// Indicates that a background worker thread panicked. This should normally never happen.
    #[error("background thread panicked")]
    WorkerPanicked,

    /// Network I/O is disabled (`local_mode`).
    #[error("network is disabled in local mode")]
    LocalMode,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Whether the failed operation may be retried against the same endpoint.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Error::RequestFailed(status) => {
                matches!(status, 408 | 500 | 502 | 503 | 504 | 522 | 524 | 599)
            }
            Error::Network(_) | Error::Io(_) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::SpecsParseError(Arc::new(value))
    }
}
