use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetlens")]
#[command(about = "Multi-modal meeting analysis", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the HTTP API server (default)
    Serve,
    /// Register a recording (audio, screenshots, context) for analysis
    Import(ImportCliArgs),
    /// Analyze a recording in the terminal
    Analyze(AnalyzeCliArgs),
    /// Show the analysis status of one or all recordings
    Status(StatusCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ImportCliArgs {
    /// Audio or video file of the meeting
    #[arg(short, long)]
    pub audio: Option<PathBuf>,
    /// Screenshot file, in timeline order (repeatable)
    #[arg(short, long = "image")]
    pub images: Vec<PathBuf>,
    /// Directory of screenshots, ordered by file name
    #[arg(long)]
    pub images_dir: Option<PathBuf>,
    /// Text file with transcript, speaker timeline or notes
    #[arg(short, long)]
    pub context: Option<PathBuf>,
    /// Recording title
    #[arg(short, long)]
    pub title: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct AnalyzeCliArgs {
    /// Recording ID
    pub id: i64,
    /// Write the analysis to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Disable the progress indicator
    #[arg(long)]
    pub no_progress: bool,
    /// Start even if the recording is marked as processing (stale job)
    #[arg(long)]
    pub force: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatusCliArgs {
    /// Recording ID; lists recent recordings when omitted
    pub id: Option<i64>,
    /// Maximum number of recordings to list
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}
