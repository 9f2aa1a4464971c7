use thiserror::Error;

use crate::api::ApiError;
use crate::upload_queue::{UploadError, ValidationError};

/// CallSync application errors
#[derive(Debug, Error)]
pub enum CallSyncError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected file selection (missing agent, bad type, duplicate)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Backend request errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Chunked upload errors
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// No record with the given id
    #[error("Upload record not found: {0}")]
    RecordNotFound(String),

    /// Operation not allowed in the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Start-analysis was triggered with nothing uploaded
    #[error("No successfully uploaded files available to analyze.")]
    NothingToAnalyze,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CallSyncError>;

/// Convert CallSyncError to String for display surfaces that only take text
impl From<CallSyncError> for String {
    fn from(err: CallSyncError) -> String {
        err.to_string()
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> std::result::Result<T, CallSyncError>;
}

impl<T, E: Into<CallSyncError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> std::result::Result<T, CallSyncError> {
        self.map_err(|e| {
            let err: CallSyncError = e.into();
            match err {
                CallSyncError::Other(s) => CallSyncError::Other(format!("{}: {}", msg, s)),
                CallSyncError::Config(s) => CallSyncError::Config(format!("{}: {}", msg, s)),
                CallSyncError::InvalidState(s) => {
                    CallSyncError::InvalidState(format!("{}: {}", msg, s))
                }
                CallSyncError::Io(e) => {
                    CallSyncError::Io(std::io::Error::new(e.kind(), format!("{}: {}", msg, e)))
                }
                other => other,
            }
        })
    }
}
