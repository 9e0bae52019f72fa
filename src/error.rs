//! Error types for ondl-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied a request we cannot act on. Never retried.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The job is not where the caller expected it. For a claim this means
    /// another consumer won the race.
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// A job file on disk that is not a usable job record.
    #[error("malformed job {name}: {reason}")]
    MalformedJob { name: String, reason: String },

    #[error("metadata resolution failed: {0}")]
    Resolution(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("preview failed: {0}")]
    Preview(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("unsupported app: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for a lost claim race or a file that vanished underneath us.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
