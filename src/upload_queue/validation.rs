//! Selection checks for candidate uploads.
//!
//! Rejections here are advisory and per file: nothing is enqueued for a
//! rejected file and the rest of the selection proceeds.

use std::path::Path;
use thiserror::Error;

use super::records::RecordStore;
use super::types::SelectedFile;

/// MIME types the backend accepts for call recordings
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "video/mp4",
];

/// Extensions picked up when walking a directory
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "mp4"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select an agent first.")]
    MissingAgent,

    #[error("File type {content_type} for \"{file_name}\" not allowed. It will be skipped.")]
    UnsupportedType {
        file_name: String,
        content_type: String,
    },

    #[error("File \"{file_name}\" for this agent is already being processed or has been uploaded. It will be skipped.")]
    Duplicate { file_name: String },
}

pub fn validate_agent(agent_id: &str) -> Result<(), ValidationError> {
    if agent_id.trim().is_empty() {
        return Err(ValidationError::MissingAgent);
    }
    Ok(())
}

pub fn validate_content_type(file: &SelectedFile) -> Result<(), ValidationError> {
    if ALLOWED_MIME_TYPES.contains(&file.content_type.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedType {
            file_name: file.name.clone(),
            content_type: file.content_type.clone(),
        })
    }
}

/// Same file name for the same agent, unless the earlier attempt errored
pub fn validate_not_duplicate(
    store: &RecordStore,
    file: &SelectedFile,
    agent_id: &str,
) -> Result<(), ValidationError> {
    if store.find_duplicate(&file.name, agent_id).is_some() {
        return Err(ValidationError::Duplicate {
            file_name: file.name.clone(),
        });
    }
    Ok(())
}

pub fn validate_selection(
    store: &RecordStore,
    file: &SelectedFile,
    agent_id: &str,
) -> Result<(), ValidationError> {
    validate_content_type(file)?;
    validate_not_duplicate(store, file, agent_id)
}

/// Best-effort MIME type from a file extension
pub fn mime_from_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
