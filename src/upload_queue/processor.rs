//! Drives one record through a single upload attempt.

use std::sync::Arc;
use uuid::Uuid;

use super::chunked::upload_file_in_chunks;
use super::records::RecordStore;
use super::types::{
    RecordPatch, UploadStatus, MSG_INITIATING_UPLOAD, MSG_UPLOAD_FAILED, MSG_UPLOAD_SUCCESSFUL,
};
use crate::api::CallApi;
use crate::logging::{log_error, log_info, UPLOAD_COMPONENT};

/// Upload the file behind `record_id` and record the outcome on the record.
///
/// Every attempt gets a fresh upload id. Failures never escape: they end up
/// as an `error` record carrying the reason.
pub async fn process_file_upload(
    api: Arc<dyn CallApi>,
    store: RecordStore,
    record_id: String,
    chunk_size: usize,
) {
    let Some(record) = store.get(&record_id) else {
        return;
    };

    let upload_id = Uuid::new_v4().to_string();
    store.update(
        &record_id,
        RecordPatch::status(UploadStatus::Uploading)
            .with_progress(0)
            .with_message(MSG_INITIATING_UPLOAD)
            .with_upload_id(upload_id.clone()),
    );

    let progress_store = store.clone();
    let progress_id = record_id.clone();
    let result = upload_file_in_chunks(
        api.as_ref(),
        &record.file,
        &upload_id,
        chunk_size,
        move |progress, message| {
            progress_store.update(
                &progress_id,
                RecordPatch::message(message).with_progress(progress),
            );
        },
    )
    .await;

    match result {
        Ok(response) => {
            let file_id = response.server_file_id();
            store.update(
                &record_id,
                RecordPatch::status(UploadStatus::Completed)
                    .with_progress(100)
                    .with_message(MSG_UPLOAD_SUCCESSFUL)
                    .with_server_file_id(file_id),
            );
            log_info(
                UPLOAD_COMPONENT,
                &format!(
                    "Uploaded {} (file id {})",
                    record.file.name,
                    file_id.map_or_else(|| "none".to_string(), |id| id.to_string())
                ),
            )
            .unwrap_or_default();
        }
        Err(e) => {
            store.update(
                &record_id,
                RecordPatch::status(UploadStatus::Error)
                    .with_message(MSG_UPLOAD_FAILED)
                    .with_error(e.to_string()),
            );
            log_error(
                UPLOAD_COMPONENT,
                &format!("Upload of {} failed: {}", record.file.name, e),
            )
            .unwrap_or_default();
        }
    }
}
