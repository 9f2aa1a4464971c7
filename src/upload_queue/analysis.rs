//! Starting transcription for every uploaded record at once.

use futures::future::join_all;
use std::sync::Arc;

use super::polling::PollingEngine;
use super::records::RecordStore;
use super::tabs::TabSwitcher;
use super::types::{
    ActiveTab, AnalysisStartReport, RecordPatch, UploadStatus, MSG_ANALYSIS_INITIATED,
    MSG_ANALYSIS_START_FAILED,
};
use crate::api::CallApi;
use crate::error::{CallSyncError, Result};
use crate::events::{EventBus, NoticeLevel, QueueEventPayload};
use crate::logging::{log_error, log_info, ANALYSIS_COMPONENT};

const POLLING_STOPPED: &str = "Polling has been shut down";

enum StartOutcome {
    Started(String, String),
    Failed(String, String),
}

/// Move every `completed` record with a server file id to `analyzing`,
/// start all jobs concurrently and begin polling the ones that started.
///
/// Resolves once every start request has settled.
pub async fn start_analysis_batch(
    api: Arc<dyn CallApi>,
    store: &RecordStore,
    tabs: &TabSwitcher,
    polling: &PollingEngine,
    events: &EventBus,
) -> Result<AnalysisStartReport> {
    let candidates: Vec<(String, i64)> = store
        .filter_by_status(&[UploadStatus::Completed])
        .into_iter()
        .filter_map(|record| record.server_file_id.map(|file_id| (record.id, file_id)))
        .collect();

    if candidates.is_empty() {
        let err = CallSyncError::NothingToAnalyze;
        let _ = events.publish(
            ANALYSIS_COMPONENT,
            QueueEventPayload::Notice {
                level: NoticeLevel::Warning,
                message: err.to_string(),
            },
        );
        return Err(err);
    }

    for (record_id, _) in &candidates {
        store.update(
            record_id,
            RecordPatch::status(UploadStatus::Analyzing).with_message(MSG_ANALYSIS_INITIATED),
        );
    }
    tabs.switch_to(ActiveTab::Analyzing);

    log_info(
        ANALYSIS_COMPONENT,
        &format!("Starting analysis for {} files", candidates.len()),
    )
    .unwrap_or_default();

    let starts = candidates.into_iter().map(|(record_id, file_id)| {
        let api = Arc::clone(&api);
        async move {
            let started = match api.start_transcription(file_id).await {
                Ok(job) => {
                    store.update(
                        &record_id,
                        RecordPatch::message(MSG_ANALYSIS_INITIATED).with_job_id(job.job_id.clone()),
                    );
                    if polling.start_polling(&record_id, &job.job_id) {
                        Ok(job.job_id)
                    } else {
                        Err(POLLING_STOPPED.to_string())
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            match started {
                Ok(job_id) => StartOutcome::Started(record_id, job_id),
                Err(reason) => {
                    log_error(
                        ANALYSIS_COMPONENT,
                        &format!("Failed to start analysis for {}: {}", record_id, reason),
                    )
                    .unwrap_or_default();

                    let updated = store.update_and_check_drained(
                        &record_id,
                        RecordPatch::status(UploadStatus::AnalysisFailed)
                            .with_message(MSG_ANALYSIS_START_FAILED)
                            .with_error(reason.clone()),
                    );
                    if matches!(updated, Some((_, true))) {
                        tabs.switch_to(ActiveTab::Results);
                    }
                    StartOutcome::Failed(record_id, reason)
                }
            }
        }
    });

    let mut report = AnalysisStartReport::default();
    for outcome in join_all(starts).await {
        match outcome {
            StartOutcome::Started(record_id, job_id) => report.started.push((record_id, job_id)),
            StartOutcome::Failed(record_id, reason) => report.failed.push((record_id, reason)),
        }
    }

    if !report.failed.is_empty() {
        let _ = events.publish(
            ANALYSIS_COMPONENT,
            QueueEventPayload::Notice {
                level: NoticeLevel::Error,
                message: format!("{} file(s) failed to start analysis.", report.failed.len()),
            },
        );
    }

    Ok(report)
}
