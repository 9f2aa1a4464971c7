use super::types::{
    value_as_string, Agent, ApiEnvelope, ChunkPart, ChunkUploadResponse, TranscriptJob,
    TranscriptJobData, TranscriptStatus,
};
use super::{
    ApiError, CallApi, AGENT_LIST_PATH, TRANSCRIPT_PATH, TRANSCRIPT_STATUS_PATH,
    UPLOAD_CHUNK_PATH,
};
use crate::config::CallSyncConfig;
use crate::logging::{log_debug, log_warn, API_COMPONENT};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// Upper bound on any single request, so a hung status poll surfaces as an error
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// reqwest-backed client for the call-analysis backend
///
/// Every request gets `Authorization: Bearer <token>` from the session
/// credential unless the request already set its own header.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: Url, token: Option<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        mut base_url: Url,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        // Relative joins need a trailing slash to keep any path prefix
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            token: Arc::new(RwLock::new(token)),
        })
    }

    pub fn from_config(config: &CallSyncConfig) -> crate::error::Result<Self> {
        Ok(Self::new(config.server_url()?, config.auth_token.clone())?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Replace the session credential used for subsequent requests
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let mut request = builder.build()?;

        if !request.headers().contains_key(AUTHORIZATION) {
            if let Some(token) = self.current_token() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| ApiError::InvalidToken)?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        log_debug(
            API_COMPONENT,
            &format!("{} {}", request.method(), request.url()),
        )
        .unwrap_or_default();

        Ok(self.http.execute(request).await?)
    }

    /// Decode the response envelope, mapping HTTP and `success: false` failures
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        fallback: &str,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .map(|envelope| envelope.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

            if status.as_u16() == 401 {
                log_warn(
                    API_COMPONENT,
                    "Unauthorized access (401). Token might be invalid or expired.",
                )
                .unwrap_or_default();
            }

            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

        if !envelope.success {
            let message = if envelope.message.is_empty() {
                fallback.to_string()
            } else {
                envelope.message
            };
            return Err(ApiError::ServerReported(message));
        }

        Ok(envelope)
    }
}

#[async_trait]
impl CallApi for ApiClient {
    async fn upload_chunk(&self, part: ChunkPart) -> Result<ChunkUploadResponse, ApiError> {
        let fallback = format!("Chunk {} failed to upload.", part.part_number + 1);
        let length = part.bytes.len() as u64;

        let file_part = Part::stream_with_length(part.bytes, length)
            .file_name(part.file_name.clone())
            .mime_str(&part.content_type)?;

        let form = Form::new()
            .part("file", file_part)
            .text("filename", part.file_name)
            .text("upload_id", part.upload_id)
            .text("part_number", part.part_number.to_string())
            .text("part_count", part.part_count.to_string());

        let url = self.endpoint(UPLOAD_CHUNK_PATH)?;
        let response = self.send(self.http.post(url).multipart(form)).await?;

        // Chunk replies carry FileId at two levels, so no generic envelope here
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ChunkUploadResponse>(&body)
                .ok()
                .map(|parsed| parsed.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChunkUploadResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;
        if !parsed.success {
            let message = if parsed.message.is_empty() {
                fallback
            } else {
                parsed.message
            };
            return Err(ApiError::ServerReported(message));
        }

        Ok(parsed)
    }

    async fn start_transcription(&self, file_id: i64) -> Result<TranscriptJob, ApiError> {
        let url = self.endpoint(TRANSCRIPT_PATH)?;
        let response = self
            .send(
                self.http
                    .post(url)
                    .json(&serde_json::json!({ "id": file_id })),
            )
            .await?;

        let envelope: ApiEnvelope<TranscriptJobData> =
            Self::read_envelope(response, "Failed to start transcription").await?;

        let job_id = envelope
            .data
            .and_then(|data| data.job_id)
            .as_ref()
            .and_then(value_as_string)
            .ok_or_else(|| ApiError::MalformedResponse("response has no JobId".to_string()))?;

        Ok(TranscriptJob { job_id })
    }

    async fn transcription_status(&self, job_id: &str) -> Result<TranscriptStatus, ApiError> {
        let url = self.endpoint(&format!(
            "{}?jobid={}",
            TRANSCRIPT_STATUS_PATH,
            urlencoding::encode(job_id)
        ))?;
        let response = self.send(self.http.get(url)).await?;

        let envelope: ApiEnvelope<TranscriptStatus> =
            Self::read_envelope(response, "Failed to check transcription status").await?;

        envelope
            .data
            .ok_or_else(|| ApiError::MalformedResponse("status response has no data".to_string()))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        let url = self.endpoint(AGENT_LIST_PATH)?;
        let response = self.send(self.http.get(url)).await?;

        let envelope: ApiEnvelope<Vec<Agent>> =
            Self::read_envelope(response, "Failed to fetch agents").await?;

        Ok(envelope.data.unwrap_or_default())
    }
}
