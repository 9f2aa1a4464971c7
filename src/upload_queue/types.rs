//! Type definitions for the upload queue.
//!
//! Defines the record lifecycle (UploadStatus), the per-file UploadRecord,
//! partial updates (RecordPatch), tab buckets and the reports returned to
//! callers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::task::JoinHandle;

use super::validation::{mime_from_path, ValidationError};
use crate::error::{CallSyncError, ErrorContext};

// Progress/status copy shown next to each record
pub const MSG_INITIATING_UPLOAD: &str = "Initiating upload...";
pub const MSG_UPLOAD_SUCCESSFUL: &str = "Upload successful!";
pub const MSG_UPLOAD_FAILED: &str = "Upload failed";
pub const MSG_ANALYSIS_INITIATED: &str = "Analysis initiated...";
pub const MSG_ANALYSIS_START_FAILED: &str = "Failed to start analysis.";
pub const MSG_ANALYSIS_COMPLETE: &str = "Analysis complete!";
pub const MSG_ANALYSIS_FAILED: &str = "Analysis failed.";
pub const MSG_ANALYSIS_FAILED_FALLBACK: &str = "Analysis process failed";
pub const MSG_POLLING_ERROR: &str = "Polling error.";

/// Record lifecycle:
/// `pending → uploading → {completed, error}`, `error → uploading` (retry),
/// `completed → analyzing → {analysis_complete, analysis_failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
    Analyzing,
    AnalysisFailed,
    AnalysisComplete,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::Analyzing => "analyzing",
            UploadStatus::AnalysisFailed => "analysis_failed",
            UploadStatus::AnalysisComplete => "analysis_complete",
        }
    }

    /// Statuses where `error_message` is meaningful
    pub fn is_failure(&self) -> bool {
        matches!(self, UploadStatus::Error | UploadStatus::AnalysisFailed)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which list the UI is focused on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTab {
    Uploading,
    Analyzing,
    Results,
}

impl ActiveTab {
    /// Statuses listed under this tab
    pub fn statuses(&self) -> &'static [UploadStatus] {
        match self {
            ActiveTab::Uploading => &[
                UploadStatus::Pending,
                UploadStatus::Uploading,
                UploadStatus::Error,
                UploadStatus::Completed,
            ],
            ActiveTab::Analyzing => &[UploadStatus::Analyzing],
            ActiveTab::Results => &[UploadStatus::AnalysisComplete, UploadStatus::AnalysisFailed],
        }
    }
}

/// A file picked for upload; the payload is shared and never mutated
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, inferring its MIME type from the extension
    pub async fn from_path(path: &Path) -> Result<Self, CallSyncError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CallSyncError::Other(format!("Invalid file name: {}", path.display())))?
            .to_string();

        let bytes = tokio::fs::read(path)
            .await
            .context(&format!("Failed to read {}", path.display()))?;

        Ok(Self::new(name, mime_from_path(path), Bytes::from(bytes)))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: String,
    #[serde(skip)]
    pub file: SelectedFile,
    pub agent_id: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub upload_id: Option<String>,
    pub server_file_id: Option<i64>,
    pub analysis_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn file_name(&self) -> &str {
        &self.file.name
    }
}

/// Partial update merged into one record by `RecordStore::update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub status_message: Option<String>,
    /// `Some(None)` clears the message
    pub error_message: Option<Option<String>>,
    pub upload_id: Option<String>,
    pub server_file_id: Option<i64>,
    pub analysis_job_id: Option<String>,
}

impl RecordPatch {
    pub fn status(status: UploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(Some(error.into()));
        self
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_server_file_id(mut self, server_file_id: Option<i64>) -> Self {
        self.server_file_id = server_file_id;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.analysis_job_id = Some(job_id.into());
        self
    }

    pub(crate) fn apply(self, record: &mut UploadRecord) {
        if let Some(status) = self.status {
            record.status = status;
            // error_message only lives on failed records
            if !status.is_failure() {
                record.error_message = None;
            }
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(message) = self.status_message {
            record.status_message = Some(message);
        }
        if let Some(error) = self.error_message {
            if record.status.is_failure() || error.is_none() {
                record.error_message = error;
            }
        }
        if let Some(upload_id) = self.upload_id {
            record.upload_id = Some(upload_id);
        }
        if let Some(server_file_id) = self.server_file_id {
            record.server_file_id = Some(server_file_id);
        }
        if let Some(job_id) = self.analysis_job_id {
            record.analysis_job_id = Some(job_id);
        }
    }
}

/// Per-bucket counts for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    /// `completed`, the "Analyze (N) Uploaded" button
    pub ready_for_analysis: usize,
    /// pending | uploading | error | completed
    pub uploading: usize,
    pub analyzing: usize,
    /// analysis_complete | analysis_failed
    pub analyzed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: ValidationError,
}

#[derive(Debug, Default)]
pub struct SelectionReport {
    /// Record ids, in selection order
    pub accepted: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    /// One upload task per accepted file
    pub uploads: Vec<JoinHandle<()>>,
}

impl SelectionReport {
    /// Wait for every upload task spawned by this selection
    pub async fn wait(self) {
        for handle in self.uploads {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisStartReport {
    /// (record id, job id)
    pub started: Vec<(String, String)>,
    /// (record id, reason)
    pub failed: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: UploadStatus) -> UploadRecord {
        UploadRecord {
            id: "r1".to_string(),
            file: SelectedFile::new("call1.wav", "audio/wav", Bytes::from_static(b"abc")),
            agent_id: "3".to_string(),
            status,
            progress: 0,
            status_message: None,
            error_message: None,
            upload_id: None,
            server_file_id: None,
            analysis_job_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_patch_merges_only_given_fields() {
        let mut rec = record(UploadStatus::Uploading);
        rec.upload_id = Some("u-1".to_string());

        RecordPatch::default()
            .with_progress(40)
            .with_message("Uploading part 2 of 5...")
            .apply(&mut rec);

        assert_eq!(rec.status, UploadStatus::Uploading);
        assert_eq!(rec.progress, 40);
        assert_eq!(rec.upload_id.as_deref(), Some("u-1"));
        assert_eq!(
            rec.status_message.as_deref(),
            Some("Uploading part 2 of 5...")
        );
    }

    #[test]
    fn test_error_message_only_on_failed_records() {
        let mut rec = record(UploadStatus::Uploading);
        RecordPatch::status(UploadStatus::Error)
            .with_error("disk full")
            .apply(&mut rec);
        assert_eq!(rec.error_message.as_deref(), Some("disk full"));

        // Retry moves back to uploading and drops the stale error
        RecordPatch::status(UploadStatus::Uploading).apply(&mut rec);
        assert!(rec.error_message.is_none());

        // An error without a failure status is ignored
        RecordPatch::default().with_error("noise").apply(&mut rec);
        assert!(rec.error_message.is_none());
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(RecordPatch::default().with_progress(250).progress, Some(100));
    }

    #[test]
    fn test_tab_buckets_cover_every_status_once() {
        let mut seen = Vec::new();
        for tab in [ActiveTab::Uploading, ActiveTab::Analyzing, ActiveTab::Results] {
            seen.extend_from_slice(tab.statuses());
        }
        assert_eq!(seen.len(), 7);
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Completed,
            UploadStatus::Error,
            UploadStatus::Analyzing,
            UploadStatus::AnalysisFailed,
            UploadStatus::AnalysisComplete,
        ] {
            assert_eq!(seen.iter().filter(|s| **s == status).count(), 1);
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::AnalysisComplete).unwrap(),
            "\"analysis_complete\""
        );
        assert_eq!(UploadStatus::AnalysisFailed.to_string(), "analysis_failed");
    }
}
