//! In-memory backend used by unit tests.

use super::{
    Agent, ApiError, CallApi, ChunkPart, ChunkUploadData, ChunkUploadResponse, TranscriptJob,
    TranscriptStatus,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChunk {
    pub file_name: String,
    pub upload_id: String,
    pub part_number: usize,
    pub part_count: usize,
    pub len: usize,
}

/// Scripted reply for one status request
#[derive(Debug, Clone)]
pub enum StatusReply {
    Status(&'static str),
    Failed(Option<&'static str>),
    Error(&'static str),
}

#[derive(Default)]
pub struct FakeApi {
    pub chunks: Mutex<Vec<RecordedChunk>>,
    /// (file name, 0-based part, server message) to reject
    pub failing_part: Mutex<Option<(String, usize, String)>>,
    /// FileId returned on the last chunk of each file name
    pub file_ids: Mutex<HashMap<String, i64>>,
    pub started: Mutex<Vec<i64>>,
    /// file id -> job id, or Err(message) to reject the start
    pub jobs: Mutex<HashMap<i64, Result<String, String>>>,
    pub status_script: Mutex<HashMap<String, VecDeque<StatusReply>>>,
    pub status_delay: Mutex<Option<Duration>>,
    pub status_calls: AtomicUsize,
    pub status_in_flight: AtomicUsize,
    pub max_status_in_flight: AtomicUsize,
    pub agents: Mutex<Vec<Agent>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_id(self, file_name: &str, file_id: i64) -> Self {
        self.file_ids
            .lock()
            .unwrap()
            .insert(file_name.to_string(), file_id);
        self
    }

    pub fn with_job(self, file_id: i64, job: Result<&str, &str>) -> Self {
        self.jobs.lock().unwrap().insert(
            file_id,
            job.map(str::to_string).map_err(str::to_string),
        );
        self
    }

    pub fn with_statuses(self, job_id: &str, replies: Vec<StatusReply>) -> Self {
        self.status_script
            .lock()
            .unwrap()
            .insert(job_id.to_string(), replies.into());
        self
    }

    pub fn with_failing_part(self, file_name: &str, part: usize, message: &str) -> Self {
        *self.failing_part.lock().unwrap() =
            Some((file_name.to_string(), part, message.to_string()));
        self
    }

    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn recorded_chunks(&self) -> Vec<RecordedChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallApi for FakeApi {
    async fn upload_chunk(&self, part: ChunkPart) -> Result<ChunkUploadResponse, ApiError> {
        self.chunks.lock().unwrap().push(RecordedChunk {
            file_name: part.file_name.clone(),
            upload_id: part.upload_id.clone(),
            part_number: part.part_number,
            part_count: part.part_count,
            len: part.bytes.len(),
        });
        tokio::task::yield_now().await;

        if let Some((name, failing, message)) = self.failing_part.lock().unwrap().clone() {
            if name == part.file_name && failing == part.part_number {
                return Err(ApiError::ServerReported(message));
            }
        }

        let is_last = part.part_number + 1 == part.part_count;
        let file_id = if is_last {
            self.file_ids.lock().unwrap().get(&part.file_name).copied()
        } else {
            None
        };

        Ok(ChunkUploadResponse {
            success: true,
            message: format!("part {} stored", part.part_number),
            data: file_id.map(|id| ChunkUploadData {
                file_id: Some(id.into()),
            }),
            file_id: None,
        })
    }

    async fn start_transcription(&self, file_id: i64) -> Result<TranscriptJob, ApiError> {
        self.started.lock().unwrap().push(file_id);
        tokio::task::yield_now().await;

        let job = self.jobs.lock().unwrap().get(&file_id).cloned();
        match job {
            Some(Ok(job_id)) => Ok(TranscriptJob { job_id }),
            Some(Err(message)) => Err(ApiError::ServerReported(message)),
            None => Err(ApiError::Status {
                status: 404,
                message: format!("File {} not found", file_id),
            }),
        }
    }

    async fn transcription_status(&self, job_id: &str) -> Result<TranscriptStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_status_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut script = self.status_script.lock().unwrap();
            let queue = script.entry(job_id.to_string()).or_default();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);

        let status = |raw: &str, error: Option<&str>| TranscriptStatus {
            job_id: Some(job_id.into()),
            processing_status: raw.to_string(),
            error_message: error.map(str::to_string),
        };

        match reply.unwrap_or(StatusReply::Status("transcribing")) {
            StatusReply::Status(raw) => Ok(status(raw, None)),
            StatusReply::Failed(message) => Ok(status("failed", message)),
            StatusReply::Error(message) => Err(ApiError::ServerReported(message.to_string())),
        }
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        Ok(self.agents.lock().unwrap().clone())
    }
}
