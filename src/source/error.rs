//! Error types for long-poll source operations

use std::fmt;

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors a long-poll fetch can fail with
///
/// All of them are transient from the watcher's point of view: the fetch is
/// retried with the same cursor after a backoff.
#[derive(Debug)]
pub enum SourceError {
    /// The request could not be sent or timed out
    Request(String),

    /// The source answered with a non-success status
    Status { code: u16, message: String },

    /// The response body could not be decoded
    Decode(String),

    /// The source is temporarily unable to answer
    Unavailable(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Request(msg) => write!(f, "request failed: {}", msg),
            SourceError::Status { code, message } => {
                write!(f, "unexpected status {}: {}", code, message)
            }
            SourceError::Decode(msg) => write!(f, "failed to decode response: {}", msg),
            SourceError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::Status {
                code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SourceError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}
