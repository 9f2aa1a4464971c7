use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use callsync::api::ApiClient;
use callsync::config::{self, CallSyncConfig};
use callsync::events::{EventReceiver, QueueEventPayload};
use callsync::logging::{self, UPLOAD_COMPONENT};
use callsync::upload_queue::{has_audio_extension, SelectedFile, UploadQueue, UploadStatus};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "callsync",
    version,
    about = "Upload call recordings and track their transcription"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List agents recordings can be assigned to
    Agents,
    /// Upload recordings (files or directories) for an agent
    Upload {
        #[arg(long)]
        agent: String,
        /// Start transcription once uploads finish and wait for results
        #[arg(long)]
        analyze: bool,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show or change the saved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print recent component log entries
    Logs {
        #[arg(long, default_value = UPLOAD_COMPONENT)]
        component: String,
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    SetServer { url: String },
    SetToken { token: String },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Agents => list_agents().await,
        Command::Upload {
            agent,
            analyze,
            paths,
        } => upload(&agent, analyze, &paths).await,
        Command::Config { action } => configure(action),
        Command::Logs { component, lines } => show_logs(&component, lines),
    }
}

fn build_queue(config: &CallSyncConfig) -> Result<UploadQueue> {
    if config.auth_token.is_none() {
        bail!("Not logged in: run `callsync config set-token <TOKEN>` first");
    }
    let client = ApiClient::from_config(config)?;
    Ok(UploadQueue::new(Arc::new(client), config))
}

async fn list_agents() -> Result<()> {
    let config = config::load_config()?;
    let queue = build_queue(&config)?;

    let agents = queue.list_agents().await?;
    if agents.is_empty() {
        println!("No agents found.");
    }
    for agent in agents {
        println!("{:>6}  {}", agent.id, agent.name);
    }
    Ok(())
}

/// Expand directories to the audio files inside them
fn collect_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if entry.file_type().is_file() && has_audio_extension(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

async fn read_files(paths: &[PathBuf]) -> Result<Vec<SelectedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(
            SelectedFile::from_path(path)
                .await
                .with_context(|| format!("Could not read {}", path.display()))?,
        );
    }
    Ok(files)
}

async fn print_events(mut rx: EventReceiver) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.payload {
                QueueEventPayload::RecordUpdated {
                    file_name,
                    status,
                    progress,
                    status_message,
                    error_message,
                    ..
                } => {
                    let message = error_message.or(status_message).unwrap_or_default();
                    println!(
                        "{:<32} {:<18} {:>3}%  {}",
                        file_name,
                        status.as_str(),
                        progress,
                        message
                    );
                }
                QueueEventPayload::Notice { level, message } => {
                    eprintln!("[{:?}] {}", level, message);
                }
                QueueEventPayload::TabChanged { .. } => {}
            },
            Err(RecvError::Lagged(skipped)) => {
                eprintln!("({} updates skipped)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn upload(agent: &str, analyze: bool, paths: &[PathBuf]) -> Result<()> {
    let config = config::load_config()?;
    let queue = build_queue(&config)?;

    let files = read_files(&collect_paths(paths)).await?;
    if files.is_empty() {
        bail!("No audio files found");
    }

    let printer = tokio::spawn(print_events(queue.subscribe()));

    let report = queue.select_files_for_upload(files, agent)?;
    report.wait().await;

    if analyze {
        match queue.start_analysis_for_all_completed().await {
            Ok(started) => {
                if !started.started.is_empty() {
                    tokio::select! {
                        _ = queue.wait_until_analysis_settled() => {}
                        _ = tokio::signal::ctrl_c() => {
                            eprintln!("Interrupted; pending jobs keep running on the server");
                            queue.dispose();
                        }
                    }
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    printer.abort();
    print_summary(&queue);
    Ok(())
}

fn print_summary(queue: &UploadQueue) {
    let counts = queue.counts();
    println!();
    println!(
        "Uploaded: {}  Analyzing: {}  Analyzed: {}",
        counts.ready_for_analysis, counts.analyzing, counts.analyzed
    );

    for record in queue.records() {
        let detail = match record.status {
            UploadStatus::Error | UploadStatus::AnalysisFailed => {
                record.error_message.clone().unwrap_or_default()
            }
            _ => record.status_message.clone().unwrap_or_default(),
        };
        println!(
            "  {:<32} {:<18} {}",
            record.file_name(),
            record.status.as_str(),
            detail
        );
    }
}

fn configure(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = config::load_config()?;
            if config.auth_token.is_some() {
                config.auth_token = Some("<set>".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::SetServer { url } => {
            let mut config = config::load_config_in(&config::get_config_dir()?)?;
            config.server_url = Some(url);
            config::save_config(&config)?;
            println!("Server URL saved.");
        }
        ConfigAction::SetToken { token } => {
            let mut config = config::load_config_in(&config::get_config_dir()?)?;
            config.auth_token = Some(token);
            config::save_config(&config)?;
            println!("Token saved.");
        }
        ConfigAction::Clear => {
            config::clear_config()?;
            println!("Configuration cleared.");
        }
    }
    Ok(())
}

fn show_logs(component: &str, lines: usize) -> Result<()> {
    let entries = logging::read_component_logs(component, Some(lines))
        .map_err(|e| anyhow::anyhow!("Could not read logs: {}", e))?;

    if entries.is_empty() {
        println!("No log entries for {}.", component);
    }
    // Oldest first reads naturally in a terminal
    for entry in entries.iter().rev() {
        println!("{} {:<5} {}", entry.timestamp, entry.level, entry.message);
    }
    Ok(())
}
