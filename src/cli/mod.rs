pub mod analyze;
pub mod args;
pub mod import;

pub use analyze::{handle_analyze_command, handle_status_command, ConsoleTransport};
pub use args::{AnalyzeCliArgs, Cli, CliCommand, ImportCliArgs, StatusCliArgs};
pub use import::handle_import_command;
