use crate::config::{ensure_logs_dir, get_logs_dir};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, OnceLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Component names used across the pipeline
pub const UPLOAD_COMPONENT: &str = "upload";
pub const ANALYSIS_COMPONENT: &str = "analysis";
pub const POLLING_COMPONENT: &str = "polling";
pub const API_COMPONENT: &str = "api";

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_LOG_BACKUPS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Directory for per-component JSON logs; unset means tracing output only
static COMPONENT_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

// Serializes appends so concurrent uploads don't interleave lines
static COMPONENT_LOG_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    ensure_logs_dir()?;
    let logs_dir = get_logs_dir()?;

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Console logging - compact format
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter.clone());

        // File logging for all application output
        let file_appender = tracing_appender::rolling::never(&logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();

        let _ = COMPONENT_LOG_DIR.set(logs_dir.clone());
    });

    Ok(())
}

pub fn log_component_event(
    component: &str,
    level: &str,
    message: &str,
    details: Option<serde_json::Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    match level {
        "ERROR" => error!(component = component, "{}", message),
        "WARN" => warn!(component = component, "{}", message),
        "DEBUG" => debug!(component = component, "{}", message),
        _ => info!(component = component, "{}", message),
    }

    let Some(logs_dir) = COMPONENT_LOG_DIR.get() else {
        return Ok(());
    };

    let log_entry = LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        level: level.to_string(),
        component: component.to_string(),
        message: message.to_string(),
        details,
    };

    write_component_log_entry(logs_dir, component, &log_entry)
}

fn write_component_log_entry(
    logs_dir: &Path,
    component: &str,
    entry: &LogEntry,
) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = COMPONENT_LOG_LOCK
        .lock()
        .map_err(|_| "component log lock poisoned")?;
    let log_file_path = logs_dir.join(format!("{}.log", component));

    if should_rotate_log(&log_file_path)? {
        rotate_log_file(&log_file_path)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)?;

    let json_line = serde_json::to_string(entry)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;

    Ok(())
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if !log_file_path.exists() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(log_file_path)?;
    Ok(metadata.len() > MAX_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Shift existing backups (4 -> 5, 3 -> 4, etc.)
    for i in (1..MAX_LOG_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    if log_file_path.exists() {
        let first_backup = log_file_path.with_extension("log.1");
        std::fs::rename(log_file_path, first_backup)?;
    }

    Ok(())
}

/// Read a component log, newest entries first
pub fn read_component_logs_in(
    logs_dir: &Path,
    component: &str,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, Box<dyn std::error::Error>> {
    let log_file_path = logs_dir.join(format!("{}.log", component));

    if !log_file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&log_file_path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        match line {
            Ok(line_content) => {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line_content) {
                    entries.push(entry);
                }
            }
            Err(e) => {
                warn!("Error reading log line: {}", e);
            }
        }
    }

    entries.reverse();

    if let Some(max) = max_lines {
        entries.truncate(max);
    }

    Ok(entries)
}

pub fn read_component_logs(
    component: &str,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, Box<dyn std::error::Error>> {
    read_component_logs_in(&get_logs_dir()?, component, max_lines)
}

// Convenience functions for different log levels
pub fn log_debug(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "DEBUG", message, None)
}

pub fn log_info(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "INFO", message, None)
}

pub fn log_warn(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "WARN", message, None)
}

pub fn log_error(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "ERROR", message, None)
}
