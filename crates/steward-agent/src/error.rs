//! Error types for steward-agent

use thiserror::Error;

/// Result type alias using steward-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can escape the control loop
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend client layer
    #[error(transparent)]
    Ai(#[from] steward_ai::Error),

    /// The reasoning backend failed mid-response
    #[error("Reasoning backend failed: {0}")]
    Backend(String),

    /// The blob store could not persist a value
    #[error("Blob store error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came from the reasoning backend
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Ai(_) | Error::Backend(_))
    }
}
