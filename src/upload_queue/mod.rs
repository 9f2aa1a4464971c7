// Module declarations
mod analysis;
mod chunked;
mod polling;
mod processor;
mod records;
mod tabs;
mod types;
mod validation;

pub use chunked::{chunk_ranges, part_count, progress_percent, upload_file_in_chunks, UploadError};
pub use polling::PollingEngine;
pub use processor::process_file_upload;
pub use records::RecordStore;
pub use tabs::TabSwitcher;
pub use types::*;
pub use validation::{
    has_audio_extension, mime_from_path, validate_agent, validate_selection, ValidationError,
    ALLOWED_MIME_TYPES, AUDIO_EXTENSIONS,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{Agent, CallApi};
use crate::config::CallSyncConfig;
use crate::error::{CallSyncError, Result};
use crate::events::{EventBus, EventReceiver, NoticeLevel, QueueEventPayload};
use crate::logging::{log_info, log_warn, ANALYSIS_COMPONENT, UPLOAD_COMPONENT};

/// Upload-and-analyze pipeline for call recordings.
///
/// Owns the record store, the active tab and the polling engine. Dropping
/// the queue cancels every poller.
pub struct UploadQueue {
    api: Arc<dyn CallApi>,
    store: RecordStore,
    tabs: TabSwitcher,
    polling: PollingEngine,
    events: EventBus,
    chunk_size: usize,
    agents: Arc<Mutex<Option<Vec<Agent>>>>,
    starting_analysis: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("records", &self.store.len())
            .field("active_tab", &self.tabs.current())
            .field("polling", &self.polling)
            .field("chunk_size", &self.chunk_size)
            .field("api", &"<api>")
            .finish()
    }
}

impl UploadQueue {
    pub fn new(api: Arc<dyn CallApi>, config: &CallSyncConfig) -> Self {
        Self::with_settings(api, config.chunk_size_bytes, config.poll_interval())
    }

    pub fn with_settings(api: Arc<dyn CallApi>, chunk_size: usize, poll_interval: Duration) -> Self {
        let events = EventBus::default();
        let store = RecordStore::new(events.clone());
        let tabs = TabSwitcher::new(events.clone());
        let shutdown = CancellationToken::new();
        let polling = PollingEngine::new(
            Arc::clone(&api),
            store.clone(),
            tabs.clone(),
            poll_interval,
            shutdown.child_token(),
        );

        Self {
            api,
            store,
            tabs,
            polling,
            events,
            chunk_size,
            agents: Arc::new(Mutex::new(None)),
            starting_analysis: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    fn notice(&self, component: &str, level: NoticeLevel, message: String) {
        let _ = self
            .events
            .publish(component, QueueEventPayload::Notice { level, message });
    }

    /// Agent directory, fetched once and cached
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        if let Some(agents) = self.cached_agents() {
            return Ok(agents);
        }

        let agents = match self.api.list_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                self.notice(
                    UPLOAD_COMPONENT,
                    NoticeLevel::Error,
                    format!("Could not load agents: {}", e),
                );
                return Err(e.into());
            }
        };

        if let Ok(mut cache) = self.agents.lock() {
            *cache = Some(agents.clone());
        }
        Ok(agents)
    }

    fn cached_agents(&self) -> Option<Vec<Agent>> {
        self.agents.lock().ok().and_then(|cache| cache.clone())
    }

    /// Display name for an agent id, once the directory has been loaded
    pub fn agent_name(&self, agent_id: &str) -> Option<String> {
        self.cached_agents()?
            .into_iter()
            .find(|agent| agent.key() == agent_id)
            .map(|agent| agent.name)
    }

    /// Validate and enqueue `files` for `agent_id`, starting one upload task
    /// per accepted file. Must be called from within a tokio runtime.
    ///
    /// Rejected files are reported and skipped; only a missing agent fails
    /// the whole selection.
    pub fn select_files_for_upload(
        &self,
        files: Vec<SelectedFile>,
        agent_id: &str,
    ) -> Result<SelectionReport> {
        self.ensure_active()?;
        if let Err(e) = validate_agent(agent_id) {
            self.notice(UPLOAD_COMPONENT, NoticeLevel::Warning, e.to_string());
            return Err(e.into());
        }

        let mut report = SelectionReport::default();

        for file in files {
            if let Err(reason) = validate_selection(&self.store, &file, agent_id) {
                log_warn(UPLOAD_COMPONENT, &reason.to_string()).unwrap_or_default();
                self.notice(UPLOAD_COMPONENT, NoticeLevel::Warning, reason.to_string());
                report.skipped.push(SkippedFile {
                    file_name: file.name,
                    reason,
                });
                continue;
            }

            let record_id = self.store.enqueue(file, agent_id);
            self.tabs.switch_to(ActiveTab::Uploading);
            report.uploads.push(self.spawn_upload(record_id.clone()));
            report.accepted.push(record_id);
        }

        log_info(
            UPLOAD_COMPONENT,
            &format!(
                "Selection for agent {}: {} accepted, {} skipped",
                agent_id,
                report.accepted.len(),
                report.skipped.len()
            ),
        )
        .unwrap_or_default();

        Ok(report)
    }

    fn spawn_upload(&self, record_id: String) -> JoinHandle<()> {
        tokio::spawn(process_file_upload(
            Arc::clone(&self.api),
            self.store.clone(),
            record_id,
            self.chunk_size,
        ))
    }

    /// Upload a failed record again under the same record id
    pub fn retry_upload(&self, record_id: &str) -> Result<JoinHandle<()>> {
        self.ensure_active()?;
        let record = self
            .store
            .get(record_id)
            .ok_or_else(|| CallSyncError::RecordNotFound(record_id.to_string()))?;

        if record.status != UploadStatus::Error {
            return Err(CallSyncError::InvalidState(format!(
                "{} is {}; only failed uploads can be retried",
                record.file_name(),
                record.status
            )));
        }

        log_info(
            UPLOAD_COMPONENT,
            &format!("Retrying upload of {}", record.file_name()),
        )
        .unwrap_or_default();

        // Leave `error` right away so a second retry is refused
        self.store.update(
            &record.id,
            RecordPatch::status(UploadStatus::Uploading).with_message(MSG_INITIATING_UPLOAD),
        );
        self.tabs.switch_to(ActiveTab::Uploading);
        Ok(self.spawn_upload(record.id))
    }

    /// Start transcription for every uploaded record and poll the jobs.
    ///
    /// Resolves once every start request has settled; polling continues in
    /// the background.
    pub async fn start_analysis_for_all_completed(&self) -> Result<AnalysisStartReport> {
        self.ensure_active()?;
        if self.starting_analysis.swap(true, Ordering::SeqCst) {
            return Err(CallSyncError::InvalidState(
                "analysis is already being started".to_string(),
            ));
        }

        let result = analysis::start_analysis_batch(
            Arc::clone(&self.api),
            &self.store,
            &self.tabs,
            &self.polling,
            &self.events,
        )
        .await;

        self.starting_analysis.store(false, Ordering::SeqCst);
        result
    }

    pub fn is_starting_analysis(&self) -> bool {
        self.starting_analysis.load(Ordering::SeqCst)
    }

    /// Restart polling for analyzing records that lost their poller
    pub fn recover_polling(&self) -> usize {
        self.polling.recover_orphaned()
    }

    pub fn counts(&self) -> BucketCounts {
        let records = self.store.snapshot();

        BucketCounts {
            ready_for_analysis: count_in(&records, &[UploadStatus::Completed]),
            uploading: count_in(&records, ActiveTab::Uploading.statuses()),
            analyzing: count_in(&records, ActiveTab::Analyzing.statuses()),
            analyzed: count_in(&records, ActiveTab::Results.statuses()),
        }
    }

    /// All records, most recent first
    pub fn records(&self) -> Vec<UploadRecord> {
        self.store.snapshot()
    }

    pub fn records_in(&self, tab: ActiveTab) -> Vec<UploadRecord> {
        self.store.filter_by_status(tab.statuses())
    }

    pub fn record(&self, record_id: &str) -> Option<UploadRecord> {
        self.store.get(record_id)
    }

    pub fn active_tab(&self) -> ActiveTab {
        self.tabs.current()
    }

    pub fn set_active_tab(&self, tab: ActiveTab) {
        self.tabs.switch_to(tab);
    }

    pub fn is_polling(&self, record_id: &str) -> bool {
        self.polling.is_polling(record_id)
    }

    /// Resolves once no record is `analyzing`.
    ///
    /// Only meaningful while pollers are alive; after [`dispose`](Self::dispose)
    /// analyzing records never settle.
    pub async fn wait_until_analysis_settled(&self) {
        let mut rx = self.events.subscribe();
        loop {
            if self.store.count_by_status(&[UploadStatus::Analyzing]) == 0 {
                return;
            }
            if let Err(tokio::sync::broadcast::error::RecvError::Closed) = rx.recv().await {
                return;
            }
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CallSyncError::InvalidState(
                "upload queue has been disposed".to_string(),
            ));
        }
        Ok(())
    }

    /// Cancel every poller and refuse further uploads or analysis starts
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.polling.shutdown();
        log_info(ANALYSIS_COMPONENT, "Upload queue disposed").unwrap_or_default();
    }
}

fn count_in(records: &[UploadRecord], statuses: &[UploadStatus]) -> usize {
    records
        .iter()
        .filter(|record| statuses.contains(&record.status))
        .count()
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}
