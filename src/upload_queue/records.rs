//! Ordered store of upload records.
//!
//! Records are kept most-recent-first and only ever change through
//! [`RecordStore::update`] (or its drain-checking variant). Every change is
//! published as a `RecordUpdated` event when a bus is attached.

use chrono::Utc;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::types::{RecordPatch, SelectedFile, UploadRecord, UploadStatus};
use crate::events::{EventBus, QueueEventPayload};
use crate::logging::UPLOAD_COMPONENT;

#[derive(Clone, Default)]
pub struct RecordStore {
    records: Arc<Mutex<IndexMap<String, UploadRecord>>>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("records", &self.len())
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl RecordStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            records: Arc::new(Mutex::new(IndexMap::new())),
            events: Some(events),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, UploadRecord>> {
        // A panicked writer leaves whole records behind, never half-merged ones
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a `pending` record at the front of the list and return its id
    pub fn enqueue(&self, file: SelectedFile, agent_id: &str) -> String {
        let mut records = self.lock();

        let mut id = generate_record_id(&file.name, agent_id);
        while records.contains_key(&id) {
            id = generate_record_id(&file.name, agent_id);
        }

        let record = UploadRecord {
            id: id.clone(),
            file,
            agent_id: agent_id.to_string(),
            status: UploadStatus::Pending,
            progress: 0,
            status_message: None,
            error_message: None,
            upload_id: None,
            server_file_id: None,
            analysis_job_id: None,
            created_at: Utc::now(),
        };

        records.shift_insert(0, id.clone(), record.clone());
        drop(records);

        self.publish(&record);
        id
    }

    /// Merge `patch` into the record with `id`; unknown ids are ignored
    pub fn update(&self, id: &str, patch: RecordPatch) -> Option<UploadRecord> {
        self.update_and_check_drained(id, patch)
            .map(|(record, _)| record)
    }

    /// Like [`update`](Self::update), also reporting whether this update
    /// moved the last `analyzing` record out of `analyzing`.
    ///
    /// The check runs under the same lock as the update, so among racing
    /// callers exactly one observes the drain.
    pub fn update_and_check_drained(
        &self,
        id: &str,
        patch: RecordPatch,
    ) -> Option<(UploadRecord, bool)> {
        let mut records = self.lock();

        let record = records.get_mut(id)?;
        let was_analyzing = record.status == UploadStatus::Analyzing;
        patch.apply(record);
        let updated = record.clone();

        let drained = was_analyzing
            && updated.status != UploadStatus::Analyzing
            && !records
                .values()
                .any(|record| record.status == UploadStatus::Analyzing);
        drop(records);

        self.publish(&updated);
        Some((updated, drained))
    }

    pub fn get(&self, id: &str) -> Option<UploadRecord> {
        self.lock().get(id).cloned()
    }

    /// All records, most recent first
    pub fn snapshot(&self) -> Vec<UploadRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn filter_by_status(&self, statuses: &[UploadStatus]) -> Vec<UploadRecord> {
        self.lock()
            .values()
            .filter(|record| statuses.contains(&record.status))
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, statuses: &[UploadStatus]) -> usize {
        self.lock()
            .values()
            .filter(|record| statuses.contains(&record.status))
            .count()
    }

    /// Id of a non-errored record for the same file name and agent
    pub fn find_duplicate(&self, file_name: &str, agent_id: &str) -> Option<String> {
        self.lock()
            .values()
            .find(|record| {
                record.file.name == file_name
                    && record.agent_id == agent_id
                    && record.status != UploadStatus::Error
            })
            .map(|record| record.id.clone())
    }

    /// (record id, job id) for every analyzing record that has a job
    pub fn analyzing_with_jobs(&self) -> Vec<(String, String)> {
        self.lock()
            .values()
            .filter(|record| record.status == UploadStatus::Analyzing)
            .filter_map(|record| {
                record
                    .analysis_job_id
                    .as_ref()
                    .filter(|job| !job.is_empty())
                    .map(|job| (record.id.clone(), job.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, record: &UploadRecord) {
        if let Some(events) = &self.events {
            let _ = events.publish(
                UPLOAD_COMPONENT,
                QueueEventPayload::RecordUpdated {
                    record_id: record.id.clone(),
                    file_name: record.file.name.clone(),
                    status: record.status,
                    progress: record.progress,
                    status_message: record.status_message.clone(),
                    error_message: record.error_message.clone(),
                },
            );
        }
    }
}

/// `{file}-{agent}-{unix millis}-{5 random chars}`
fn generate_record_id(file_name: &str, agent_id: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}-{}",
        file_name,
        agent_id,
        Utc::now().timestamp_millis(),
        &random[..5]
    )
}
