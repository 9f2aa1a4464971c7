//! Backend access for uploads, transcription jobs and the agent directory.
//!
//! The pipeline only talks to the backend through [`CallApi`], so tests can
//! drive it with an in-memory backend while the binary uses [`ApiClient`].

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod types;

pub use client::ApiClient;
pub use types::{
    Agent, ApiEnvelope, ChunkPart, ChunkUploadData, ChunkUploadResponse, JobStatus,
    TranscriptJob, TranscriptStatus,
};

use async_trait::async_trait;
use thiserror::Error;

pub const UPLOAD_CHUNK_PATH: &str = "api/v1/file/upload/chunks";
pub const TRANSCRIPT_PATH: &str = "api/v1/transcript";
pub const TRANSCRIPT_STATUS_PATH: &str = "api/v1/transcript/status";
pub const AGENT_LIST_PATH: &str = "api/v1/agent";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, timeout or body read failures
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response; message is the body's `message` when it had one
    #[error("{message}")]
    Status { status: u16, message: String },

    /// 2xx response with `success: false`
    #[error("{0}")]
    ServerReported(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Auth token is not a valid header value")]
    InvalidToken,

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Message the backend itself supplied, if any
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } | ApiError::ServerReported(message)
                if !message.is_empty() =>
            {
                Some(message)
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait CallApi: Send + Sync {
    /// POST one multipart chunk
    async fn upload_chunk(&self, part: ChunkPart) -> Result<ChunkUploadResponse, ApiError>;

    /// POST `{id}` to start transcription of an uploaded file
    async fn start_transcription(&self, file_id: i64) -> Result<TranscriptJob, ApiError>;

    /// GET the processing status of a transcription job
    async fn transcription_status(&self, job_id: &str) -> Result<TranscriptStatus, ApiError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, ApiError>;
}
