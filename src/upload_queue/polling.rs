//! Per-record polling of transcription jobs.
//!
//! Each record with a job gets at most one poller task. A poller asks for the
//! job status right away and then once per interval, awaiting each request
//! before the next tick so requests for one record never overlap. Terminal
//! statuses are written to the record and the poller removes itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::records::RecordStore;
use super::tabs::TabSwitcher;
use super::types::{
    ActiveTab, RecordPatch, UploadStatus, MSG_ANALYSIS_COMPLETE, MSG_ANALYSIS_FAILED,
    MSG_ANALYSIS_FAILED_FALLBACK, MSG_POLLING_ERROR,
};
use crate::api::{ApiError, CallApi, JobStatus, TranscriptStatus};
use crate::logging::{log_debug, log_info, log_warn, POLLING_COMPONENT};

struct Registration {
    token: CancellationToken,
    generation: u64,
    _task: JoinHandle<()>,
}

struct PollingInner {
    api: Arc<dyn CallApi>,
    store: RecordStore,
    tabs: TabSwitcher,
    interval: Duration,
    root: CancellationToken,
    registrations: Mutex<HashMap<String, Registration>>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct PollingEngine {
    inner: Arc<PollingInner>,
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("interval", &self.inner.interval)
            .field("active", &self.active_count())
            .finish()
    }
}

impl PollingEngine {
    pub fn new(
        api: Arc<dyn CallApi>,
        store: RecordStore,
        tabs: TabSwitcher,
        interval: Duration,
        root: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                api,
                store,
                tabs,
                interval,
                root,
                registrations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Poll `job_id` for `record_id`, replacing any poller already running
    /// for that record. Must be called from within a tokio runtime.
    ///
    /// Returns false once the engine has been shut down.
    pub fn start_polling(&self, record_id: &str, job_id: &str) -> bool {
        let mut registrations = self.registrations();

        if let Some(previous) = registrations.remove(record_id) {
            previous.token.cancel();
        }

        if self.inner.root.is_cancelled() {
            log_warn(
                POLLING_COMPONENT,
                &format!("Not polling {}: queue is shut down", record_id),
            )
            .unwrap_or_default();
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = self.inner.root.child_token();

        // The registration lock is held until insert, so the task cannot
        // deregister itself before it is registered.
        let task = tokio::spawn(self.clone().run_poller(
            record_id.to_string(),
            job_id.to_string(),
            token.clone(),
            generation,
        ));

        registrations.insert(
            record_id.to_string(),
            Registration {
                token,
                generation,
                _task: task,
            },
        );

        log_info(
            POLLING_COMPONENT,
            &format!("Polling job {} for {}", job_id, record_id),
        )
        .unwrap_or_default();
        true
    }

    async fn run_poller(
        self,
        record_id: String,
        job_id: String,
        token: CancellationToken,
        generation: u64,
    ) {
        let mut ticker = tokio::time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.inner.api.transcription_status(&job_id) => result,
            };

            // A reply that lands after cancellation is dropped
            if token.is_cancelled() {
                break;
            }

            if self.apply(&record_id, &job_id, result) {
                self.deregister(&record_id, generation);
                break;
            }
        }
    }

    /// Write one poll result to the record; true when polling should stop
    fn apply(
        &self,
        record_id: &str,
        job_id: &str,
        result: Result<TranscriptStatus, ApiError>,
    ) -> bool {
        let patch = match result {
            Ok(status) => match status.status() {
                JobStatus::Completed => RecordPatch::status(UploadStatus::AnalysisComplete)
                    .with_progress(100)
                    .with_message(MSG_ANALYSIS_COMPLETE),
                JobStatus::Failed => {
                    let reason = status
                        .error_message
                        .filter(|message| !message.is_empty())
                        .unwrap_or_else(|| MSG_ANALYSIS_FAILED_FALLBACK.to_string());
                    RecordPatch::status(UploadStatus::AnalysisFailed)
                        .with_message(MSG_ANALYSIS_FAILED)
                        .with_error(reason)
                }
                JobStatus::InProgress(raw) => {
                    log_debug(
                        POLLING_COMPONENT,
                        &format!("Job {} for {} is {}", job_id, record_id, raw),
                    )
                    .unwrap_or_default();
                    let message = format!("Analyzing... (status: {})", raw);
                    return self
                        .inner
                        .store
                        .update(record_id, RecordPatch::message(message))
                        .is_none();
                }
            },
            Err(e) => {
                log_warn(
                    POLLING_COMPONENT,
                    &format!("Polling job {} for {} failed: {}", job_id, record_id, e),
                )
                .unwrap_or_default();
                RecordPatch::status(UploadStatus::AnalysisFailed)
                    .with_message(MSG_POLLING_ERROR)
                    .with_error(e.to_string())
            }
        };

        let updated = self.inner.store.update_and_check_drained(record_id, patch);
        if let Some((record, drained)) = updated {
            log_info(
                POLLING_COMPONENT,
                &format!("{} finished with {}", record.file_name(), record.status),
            )
            .unwrap_or_default();
            if drained {
                self.inner.tabs.switch_to(ActiveTab::Results);
            }
        }
        true
    }

    /// Remove the registration only if it still belongs to `generation`
    fn deregister(&self, record_id: &str, generation: u64) {
        let mut registrations = self.registrations();
        if registrations
            .get(record_id)
            .is_some_and(|registration| registration.generation == generation)
        {
            registrations.remove(record_id);
        }
    }

    /// Stop polling `record_id`; a no-op when it is not being polled
    pub fn cancel(&self, record_id: &str) {
        if let Some(registration) = self.registrations().remove(record_id) {
            registration.token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<Registration> = self
            .registrations()
            .drain()
            .map(|(_, registration)| registration)
            .collect();
        for registration in &drained {
            registration.token.cancel();
        }
        if !drained.is_empty() {
            log_info(
                POLLING_COMPONENT,
                &format!("Cancelled {} pollers", drained.len()),
            )
            .unwrap_or_default();
        }
    }

    /// Cancel everything and refuse new pollers
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.cancel_all();
    }

    pub fn is_polling(&self, record_id: &str) -> bool {
        self.registrations()
            .get(record_id)
            .is_some_and(|registration| !registration.token.is_cancelled())
    }

    pub fn active_count(&self) -> usize {
        self.registrations()
            .values()
            .filter(|registration| !registration.token.is_cancelled())
            .count()
    }

    /// Restart polling for every analyzing record that has a job but no
    /// live poller. Returns how many were restarted.
    pub fn recover_orphaned(&self) -> usize {
        let mut restarted = 0;
        for (record_id, job_id) in self.inner.store.analyzing_with_jobs() {
            if !self.is_polling(&record_id) && self.start_polling(&record_id, &job_id) {
                restarted += 1;
            }
        }
        if restarted > 0 {
            log_info(
                POLLING_COMPONENT,
                &format!("Recovered {} orphaned pollers", restarted),
            )
            .unwrap_or_default();
        }
        restarted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeApi, StatusReply};
    use crate::events::{EventBus, QueueEventPayload};
    use crate::upload_queue::SelectedFile;
    use bytes::Bytes;

    const INTERVAL: Duration = Duration::from_millis(5000);

    struct Harness {
        api: Arc<FakeApi>,
        store: RecordStore,
        engine: PollingEngine,
        bus: EventBus,
    }

    fn harness(api: FakeApi) -> Harness {
        let api = Arc::new(api);
        let bus = EventBus::new(256);
        let store = RecordStore::new(bus.clone());
        let tabs = TabSwitcher::new(bus.clone());
        let engine = PollingEngine::new(
            api.clone(),
            store.clone(),
            tabs,
            INTERVAL,
            CancellationToken::new(),
        );
        Harness {
            api,
            store,
            engine,
            bus,
        }
    }

    fn analyzing(store: &RecordStore, name: &str, job_id: &str) -> String {
        let id = store.enqueue(
            SelectedFile::new(name, "audio/wav", Bytes::from_static(b"RIFF")),
            "3",
        );
        store.update(
            &id,
            RecordPatch::status(UploadStatus::Analyzing).with_job_id(job_id),
        );
        id
    }

    async fn wait_for_idle(engine: &PollingEngine) {
        for _ in 0..100 {
            if engine.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("pollers still active");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let h = harness(FakeApi::new().with_statuses(
            "j-1",
            vec![StatusReply::Status("transcribing"), StatusReply::Status("completed")],
        ));
        let id = analyzing(&h.store, "call1.wav", "j-1");

        h.engine.start_polling(&id, "j-1");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let record = h.store.get(&id).unwrap();
        assert_eq!(record.status, UploadStatus::Analyzing);
        assert_eq!(
            record.status_message.as_deref(),
            Some("Analyzing... (status: transcribing)")
        );
        assert!(h.engine.is_polling(&id));

        tokio::time::sleep(INTERVAL).await;

        let record = h.store.get(&id).unwrap();
        assert_eq!(record.status, UploadStatus::AnalysisComplete);
        assert_eq!(record.status_message.as_deref(), Some(MSG_ANALYSIS_COMPLETE));
        assert!(!h.engine.is_polling(&id));
        assert_eq!(h.api.status_calls(), 2);

        // No further requests once terminal
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(h.api.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_uses_server_message_or_fallback() {
        let h = harness(
            FakeApi::new()
                .with_statuses("j-a", vec![StatusReply::Failed(Some("Unsupported codec"))])
                .with_statuses("j-b", vec![StatusReply::Failed(None)]),
        );
        let a = analyzing(&h.store, "a.wav", "j-a");
        let b = analyzing(&h.store, "b.wav", "j-b");

        h.engine.start_polling(&a, "j-a");
        h.engine.start_polling(&b, "j-b");
        wait_for_idle(&h.engine).await;

        let a = h.store.get(&a).unwrap();
        assert_eq!(a.status, UploadStatus::AnalysisFailed);
        assert_eq!(a.status_message.as_deref(), Some(MSG_ANALYSIS_FAILED));
        assert_eq!(a.error_message.as_deref(), Some("Unsupported codec"));

        let b = h.store.get(&b).unwrap();
        assert_eq!(b.error_message.as_deref(), Some(MSG_ANALYSIS_FAILED_FALLBACK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_failure_is_polling_error() {
        let h = harness(
            FakeApi::new().with_statuses("j-1", vec![StatusReply::Error("Job not found")]),
        );
        let id = analyzing(&h.store, "call1.wav", "j-1");

        h.engine.start_polling(&id, "j-1");
        wait_for_idle(&h.engine).await;

        let record = h.store.get(&id).unwrap();
        assert_eq!(record.status, UploadStatus::AnalysisFailed);
        assert_eq!(record.status_message.as_deref(), Some(MSG_POLLING_ERROR));
        assert_eq!(record.error_message.as_deref(), Some("Job not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_existing_poller() {
        let h = harness(FakeApi::new());
        let id = analyzing(&h.store, "call1.wav", "j-1");

        h.engine.start_polling(&id, "j-1");
        h.engine.start_polling(&id, "j-1");
        assert_eq!(h.engine.active_count(), 1);

        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(10)).await;
        // One poller: immediate poll plus two interval polls
        assert_eq!(h.api.status_calls(), 3);

        h.engine.cancel(&id);
        h.engine.cancel(&id);
        assert!(!h.engine.is_polling(&id));

        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(h.api.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_status_requests_never_overlap() {
        let h = harness(FakeApi::new().with_status_delay(Duration::from_secs(12)));
        let id = analyzing(&h.store, "slow.wav", "j-slow");

        h.engine.start_polling(&id, "j-slow");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.api.max_status_in_flight.load(Ordering::SeqCst), 1);
        assert!(h.api.status_calls() >= 3);
        h.engine.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_tab_switch_happens_once() {
        let h = harness(
            FakeApi::new()
                .with_statuses("j-1", vec![StatusReply::Status("completed")])
                .with_statuses("j-2", vec![StatusReply::Failed(None)])
                .with_statuses(
                    "j-3",
                    vec![StatusReply::Status("queued"), StatusReply::Status("completed")],
                ),
        );
        let mut rx = h.bus.subscribe();
        let ids: Vec<String> = ["1.wav", "2.wav", "3.wav"]
            .iter()
            .zip(["j-1", "j-2", "j-3"])
            .map(|(name, job)| analyzing(&h.store, name, job))
            .collect();

        for (id, job) in ids.iter().zip(["j-1", "j-2", "j-3"]) {
            h.engine.start_polling(id, job);
        }
        wait_for_idle(&h.engine).await;

        let mut switches = 0;
        while let Ok(event) = rx.try_recv() {
            if event.payload
                == (QueueEventPayload::TabChanged {
                    tab: ActiveTab::Results,
                })
            {
                switches += 1;
            }
        }
        assert_eq!(switches, 1);
        assert_eq!(h.store.count_by_status(&[UploadStatus::Analyzing]), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_orphaned_restarts_missing_pollers() {
        let h = harness(FakeApi::new());
        let polled = analyzing(&h.store, "a.wav", "j-a");
        let orphan = analyzing(&h.store, "b.wav", "j-b");
        // Analyzing without a job yet is left alone
        let no_job = h.store.enqueue(
            SelectedFile::new("c.wav", "audio/wav", Bytes::from_static(b"RIFF")),
            "3",
        );
        h.store
            .update(&no_job, RecordPatch::status(UploadStatus::Analyzing));

        h.engine.start_polling(&polled, "j-a");
        assert_eq!(h.engine.recover_orphaned(), 1);
        assert!(h.engine.is_polling(&orphan));
        assert!(!h.engine.is_polling(&no_job));
        assert_eq!(h.engine.recover_orphaned(), 0);

        h.engine.shutdown();
        assert_eq!(h.engine.active_count(), 0);
        assert!(!h.engine.start_polling(&polled, "j-a"));
        assert!(!h.engine.is_polling(&polled));
        assert_eq!(h.engine.recover_orphaned(), 0);
    }
}
