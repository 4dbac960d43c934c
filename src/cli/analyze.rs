//! CLI handlers for running and inspecting analyses.
//!
//! `analyze` runs the same orchestrator as the HTTP API, with progress
//! rendered on a terminal spinner instead of an SSE stream.

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{
    AnalysisJob, Frame, GeminiProvider, JobStatus, Orchestrator, ProgressChannel, ProgressEvent,
    ProgressTransport, RecordingStore, TransportError,
};
use crate::cli::args::{AnalyzeCliArgs, StatusCliArgs};
use crate::config::Config;
use crate::db::{RecordingRepository, SqliteStore};

/// Renders progress events on a spinner line.
pub struct ConsoleTransport {
    pb: Option<ProgressBar>,
}

impl ConsoleTransport {
    pub fn new(show_progress: bool) -> Self {
        Self {
            pb: show_progress.then(create_progress_bar),
        }
    }
}

impl ProgressTransport for ConsoleTransport {
    fn write(&self, frame: Frame) -> Result<(), TransportError> {
        let Some(pb) = &self.pb else {
            return Ok(());
        };

        match frame {
            Frame::Event(ProgressEvent::Stage {
                label,
                detail,
                percent,
            }) => {
                if let Some(percent) = percent {
                    pb.set_position(percent as u64);
                }
                pb.set_message(stage_message(&label, detail.as_deref()));
            }
            Frame::Event(ProgressEvent::Completed { .. }) => pb.finish_with_message("Complete"),
            Frame::Event(ProgressEvent::Failed { .. }) => pb.abandon_with_message("Failed"),
            Frame::Keepalive => pb.tick(),
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn close(&self) -> Result<(), TransportError> {
        if let Some(pb) = &self.pb {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
        Ok(())
    }
}

fn stage_message(label: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("{}: {}", label, detail),
        None => format!("{}...", label),
    }
}

/// Create a styled spinner.
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Handle the analyze CLI command.
pub async fn handle_analyze_command(args: AnalyzeCliArgs) -> Result<()> {
    let config = Config::load()?;
    let settings = config.provider.resolve_settings()?;
    let store = SqliteStore::open_default()?;

    let recording = store
        .load_recording(args.id)
        .await?
        .ok_or_else(|| anyhow!("Recording {} not found", args.id))?;

    if !store.claim(args.id).await? && !args.force {
        bail!(
            "Recording {} is already being analysed (use --force if that job is stale)",
            args.id
        );
    }

    let provider = Arc::new(GeminiProvider::new(config.provider.api_endpoint.clone()));
    let orchestrator =
        Orchestrator::with_options(provider, Arc::new(store), config.analysis.options());
    let channel = Arc::new(ProgressChannel::new(ConsoleTransport::new(!args.no_progress)));

    let outcome = orchestrator
        .run(
            AnalysisJob {
                job_id: args.id,
                recording,
                settings,
            },
            channel,
        )
        .await;

    let document = match (outcome.status, outcome.document) {
        (JobStatus::Completed, Some(document)) => document,
        _ => bail!(
            "Analysis failed: {}",
            outcome.error.unwrap_or_else(|| "Unknown error".to_string())
        ),
    };

    if let Some(output_path) = &args.output {
        std::fs::write(output_path, &document.raw).context("Failed to write output file")?;
        eprintln!("Analysis saved to: {}", output_path.display());
    } else {
        println!("{}", document.raw);
    }

    Ok(())
}

/// Handle the status CLI command.
pub async fn handle_status_command(args: StatusCliArgs) -> Result<()> {
    let store = SqliteStore::open_default()?;

    let Some(id) = args.id else {
        let limit = args.limit;
        let recordings = store
            .with_conn(move |conn| RecordingRepository::list(conn, limit))
            .await?;

        if recordings.is_empty() {
            println!("No recordings found.");
            return Ok(());
        }

        println!("{:<6} {:<12} {:<20} TITLE", "ID", "STATUS", "CREATED");
        for record in recordings {
            println!(
                "{:<6} {:<12} {:<20} {}",
                record.id,
                record.status,
                record.created_at,
                record.title.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    };

    let record = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("Recording {} not found", id))?;

    println!("Recording {}", record.id);
    if let Some(title) = &record.title {
        println!("  Title:     {}", title);
    }
    println!("  Status:    {}", record.status);
    println!(
        "  Audio:     {}",
        record.audio_path.as_deref().unwrap_or("none")
    );
    println!("  Images:    {}", record.image_paths.len());
    if let Some(completed_at) = &record.completed_at {
        println!("  Finished:  {}", completed_at);
    }
    if let Some(error) = &record.error {
        println!("  Error:     {}", error);
    }
    if let Some(summary) = &record.summary {
        println!();
        println!("{}", summary);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_message() {
        assert_eq!(stage_message("Starting", None), "Starting...");
        assert_eq!(
            stage_message("Processing audio", Some("12s elapsed")),
            "Processing audio: 12s elapsed"
        );
    }

    #[test]
    fn test_hidden_console_transport_accepts_everything() {
        let channel = ProgressChannel::new(ConsoleTransport::new(false));
        channel.send(ProgressEvent::stage("Starting"));
        channel.keepalive();
        channel.send(ProgressEvent::Completed {
            result: "done".to_string(),
        });
        channel.final_end();
        assert!(!channel.is_peer_gone());
    }
}
