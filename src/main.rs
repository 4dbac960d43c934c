use anyhow::Result;
use clap::Parser;
use meetlens::{
    app,
    cli::{
        handle_analyze_command, handle_import_command, handle_status_command, Cli, CliCommand,
    },
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetlens {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Import(args)) => handle_import_command(args).await,
        Some(CliCommand::Analyze(args)) => handle_analyze_command(args).await,
        Some(CliCommand::Status(args)) => handle_status_command(args).await,
        Some(CliCommand::Serve) | None => app::run_service().await,
    }
}
