use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upload_queue::{ActiveTab, UploadStatus};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Everything a UI attached to the queue needs to react to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub payload: QueueEventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEventPayload {
    /// A record changed status, progress or message
    RecordUpdated {
        record_id: String,
        file_name: String,
        status: UploadStatus,
        progress: u8,
        status_message: Option<String>,
        error_message: Option<String>,
    },

    /// The visible tab switched
    TabChanged { tab: ActiveTab },

    /// User-facing notice (skipped files, failed starts)
    Notice { level: NoticeLevel, message: String },
}

impl QueueEvent {
    pub fn record_id(&self) -> Option<&str> {
        match &self.payload {
            QueueEventPayload::RecordUpdated { record_id, .. } => Some(record_id),
            _ => None,
        }
    }

    pub fn payload_type(&self) -> &str {
        match &self.payload {
            QueueEventPayload::RecordUpdated { .. } => "record_updated",
            QueueEventPayload::TabChanged { .. } => "tab_changed",
            QueueEventPayload::Notice { .. } => "notice",
        }
    }
}
