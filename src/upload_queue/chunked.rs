//! Sequential chunked upload of a single file.

use std::ops::Range;
use thiserror::Error;

use super::types::SelectedFile;
use crate::api::{CallApi, ChunkPart, ChunkUploadResponse};
use crate::logging::{log_debug, log_info, log_warn, UPLOAD_COMPONENT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// `part_number` is 1-based, as shown to the user
    #[error("{message}")]
    PartFailed { part_number: usize, message: String },

    #[error("No response received from server after upload completion")]
    NoResponse,
}

/// ceil(len / chunk_size)
pub fn part_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Byte ranges of each part; only the last one may be shorter
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    (0..part_count(len, chunk_size))
        .map(|index| {
            let start = index * chunk_size;
            start..(start + chunk_size).min(len)
        })
        .collect()
}

/// `done / total` as a rounded percentage
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Upload `file` part by part, stopping at the first failed part.
///
/// `on_progress` receives `(percent, message)` before the first part and
/// around every part. Returns the body of the last part, which carries the
/// server file id.
pub async fn upload_file_in_chunks<F>(
    api: &dyn CallApi,
    file: &SelectedFile,
    upload_id: &str,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<ChunkUploadResponse, UploadError>
where
    F: FnMut(u8, String) + Send,
{
    let ranges = chunk_ranges(file.size(), chunk_size);
    let total = ranges.len();

    on_progress(0, format!("Preparing to upload {} parts...", total));
    log_info(
        UPLOAD_COMPONENT,
        &format!(
            "Uploading {} ({} bytes) in {} parts, upload id {}",
            file.name,
            file.size(),
            total,
            upload_id
        ),
    )
    .unwrap_or_default();

    let mut last_response = None;

    for (index, range) in ranges.into_iter().enumerate() {
        on_progress(
            progress_percent(index, total),
            format!("Uploading part {} of {}...", index + 1, total),
        );

        let part = ChunkPart {
            file_name: file.name.clone(),
            content_type: file.content_type.clone(),
            upload_id: upload_id.to_string(),
            part_number: index,
            part_count: total,
            bytes: file.bytes.slice(range),
        };

        let response = match api.upload_chunk(part).await {
            Ok(response) => response,
            Err(e) => {
                let message = e
                    .server_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                let message = if message.is_empty() {
                    format!("Failed to upload part {}.", index + 1)
                } else {
                    message
                };

                log_warn(
                    UPLOAD_COMPONENT,
                    &format!(
                        "Part {} of {} failed for {}: {}",
                        index + 1,
                        total,
                        file.name,
                        message
                    ),
                )
                .unwrap_or_default();

                return Err(UploadError::PartFailed {
                    part_number: index + 1,
                    message,
                });
            }
        };

        let done = if index + 1 == total {
            "Upload complete!".to_string()
        } else {
            format!("Part {} uploaded.", index + 1)
        };
        on_progress(progress_percent(index + 1, total), done);

        log_debug(
            UPLOAD_COMPONENT,
            &format!("Part {}/{} of {} stored", index + 1, total, file.name),
        )
        .unwrap_or_default();

        last_response = Some(response);
    }

    last_response.ok_or(UploadError::NoResponse)
}
