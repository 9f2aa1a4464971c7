//! Wire types for the call-analysis backend.
//!
//! Every endpoint answers with the same `{success, message, data}` envelope;
//! field names inside `data` follow the backend's casing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(rename = "totalCount")]
    pub total_count: Option<u64>,
}

/// One part of a chunked upload, as sent to `/api/v1/file/upload/chunks`
#[derive(Debug, Clone)]
pub struct ChunkPart {
    pub file_name: String,
    pub content_type: String,
    pub upload_id: String,
    /// 0-based
    pub part_number: usize,
    pub part_count: usize,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkUploadData {
    #[serde(rename = "FileId", skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Value>,
}

/// Body returned for each uploaded chunk; only the last one carries `FileId`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkUploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ChunkUploadData>,
    /// Some deployments put the id at the top level instead of under `data`
    #[serde(rename = "FileId", skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Value>,
}

impl ChunkUploadResponse {
    /// Server file id, accepting numbers or numeric strings
    pub fn server_file_id(&self) -> Option<i64> {
        self.data
            .as_ref()
            .and_then(|data| data.file_id.as_ref())
            .or(self.file_id.as_ref())
            .and_then(value_as_i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TranscriptJobData {
    #[serde(rename = "JobId")]
    pub job_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptJob {
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TranscriptStatus {
    #[serde(rename = "JOBID")]
    pub job_id: Option<Value>,
    #[serde(rename = "PROCESSINGSTATUS", default)]
    pub processing_status: String,
    #[serde(rename = "ERRORMESSAGE")]
    pub error_message: Option<String>,
}

/// Interpreted `PROCESSINGSTATUS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    /// Anything else, e.g. `transcribing`; polling continues
    InProgress(String),
}

impl TranscriptStatus {
    pub fn status(&self) -> JobStatus {
        match self.processing_status.as_str() {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => JobStatus::InProgress(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
}

impl Agent {
    /// Agent ids travel through the queue as strings
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
