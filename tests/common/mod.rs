//! Fake call-analysis backend served by warp on an ephemeral port.

#![allow(dead_code)]

use bytes::BufMut;
use futures::TryStreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Reply};

pub const FILE_ID: i64 = 77;
pub const JOB_ID: &str = "j-1";

#[derive(Debug, Clone, Default)]
pub struct ReceivedPart {
    pub auth: Option<String>,
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_len: usize,
}

#[derive(Default)]
pub struct Backend {
    pub parts: Mutex<Vec<ReceivedPart>>,
    pub started: Mutex<Vec<serde_json::Value>>,
    pub status_calls: Mutex<HashMap<String, usize>>,
    pub auth_seen: Mutex<Vec<Option<String>>>,
}

impl Backend {
    pub fn parts(&self) -> Vec<ReceivedPart> {
        self.parts.lock().unwrap().clone()
    }
}

fn with_backend(
    backend: Arc<Backend>,
) -> impl Filter<Extract = (Arc<Backend>,), Error = Infallible> + Clone {
    warp::any().map(move || backend.clone())
}

fn envelope(success: bool, message: &str, data: serde_json::Value) -> Box<dyn Reply> {
    Box::new(warp::reply::json(
        &json!({ "success": success, "message": message, "data": data }),
    ))
}

fn unauthorized() -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "message": "Unauthorized" })),
        StatusCode::UNAUTHORIZED,
    ))
}

async fn handle_chunk(
    auth: Option<String>,
    form: FormData,
    backend: Arc<Backend>,
) -> Result<Box<dyn Reply>, Infallible> {
    let fields: Vec<(String, Option<String>, Option<String>, Vec<u8>)> = form
        .and_then(|mut part| async move {
            let name = part.name().to_string();
            let file_name = part.filename().map(str::to_string);
            let content_type = part.content_type().map(str::to_string);
            let mut data = Vec::new();
            while let Some(chunk) = part.data().await {
                data.put(chunk?);
            }
            Ok((name, file_name, content_type, data))
        })
        .try_collect()
        .await
        .unwrap_or_default();

    let mut received = ReceivedPart {
        auth: auth.clone(),
        ..Default::default()
    };
    for (name, file_name, content_type, data) in fields {
        if name == "file" {
            received.file_name = file_name;
            received.content_type = content_type;
            received.file_len = data.len();
        } else {
            received
                .fields
                .insert(name, String::from_utf8_lossy(&data).into_owned());
        }
    }

    if auth.is_none() {
        return Ok(unauthorized());
    }

    let part_number: usize = received
        .fields
        .get("part_number")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let part_count: usize = received
        .fields
        .get("part_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let rejected = received.file_name.as_deref() == Some("reject.wav") && part_number == 1;
    backend.parts.lock().unwrap().push(received);

    if rejected {
        return Ok(envelope(false, "Chunk checksum mismatch", json!(null)));
    }
    if part_number + 1 == part_count {
        Ok(envelope(true, "Upload complete", json!({ "FileId": FILE_ID })))
    } else {
        Ok(envelope(true, "Chunk received", json!(null)))
    }
}

async fn handle_start(
    auth: Option<String>,
    body: serde_json::Value,
    backend: Arc<Backend>,
) -> Result<Box<dyn Reply>, Infallible> {
    backend.auth_seen.lock().unwrap().push(auth.clone());
    if auth.is_none() {
        return Ok(unauthorized());
    }
    backend.started.lock().unwrap().push(body.clone());

    if body["id"] == json!(FILE_ID) {
        Ok(envelope(true, "Started", json!({ "JobId": JOB_ID })))
    } else {
        Ok(envelope(false, "File not ready for transcription", json!(null)))
    }
}

async fn handle_status(
    auth: Option<String>,
    query: HashMap<String, String>,
    backend: Arc<Backend>,
) -> Result<Box<dyn Reply>, Infallible> {
    if auth.is_none() {
        return Ok(unauthorized());
    }
    let job_id = query.get("jobid").cloned().unwrap_or_default();

    if job_id == "boom" {
        return Ok(Box::new(warp::reply::with_status(
            "internal error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )));
    }

    let calls = {
        let mut calls = backend.status_calls.lock().unwrap();
        let count = calls.entry(job_id.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let status = if calls < 2 { "transcribing" } else { "completed" };
    Ok(envelope(
        true,
        "",
        json!({ "JOBID": job_id, "PROCESSINGSTATUS": status }),
    ))
}

async fn handle_agents(auth: Option<String>) -> Result<Box<dyn Reply>, Infallible> {
    if auth.is_none() {
        return Ok(unauthorized());
    }
    Ok(Box::new(warp::reply::json(&json!({
        "success": true,
        "message": "",
        "totalCount": 2,
        "data": [{ "ID": 3, "NAME": "Dana" }, { "ID": 4, "NAME": "Lee" }]
    }))))
}

/// Start the backend; returns its base URL and shared state
pub async fn spawn_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let auth = || warp::header::optional::<String>("authorization");

    let chunks = warp::post()
        .and(warp::path!("api" / "v1" / "file" / "upload" / "chunks"))
        .and(auth())
        .and(warp::multipart::form().max_length(16 * 1024 * 1024))
        .and(with_backend(backend.clone()))
        .and_then(handle_chunk);

    let start = warp::post()
        .and(warp::path!("api" / "v1" / "transcript"))
        .and(auth())
        .and(warp::body::json::<serde_json::Value>())
        .and(with_backend(backend.clone()))
        .and_then(handle_start);

    let status = warp::get()
        .and(warp::path!("api" / "v1" / "transcript" / "status"))
        .and(auth())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_backend(backend.clone()))
        .and_then(handle_status);

    let agents = warp::get()
        .and(warp::path!("api" / "v1" / "agent"))
        .and(auth())
        .and_then(handle_agents);

    let routes = chunks.or(start).or(status).or(agents);
    let (addr, server): (SocketAddr, _) =
        warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    (format!("http://{}", addr), backend)
}
