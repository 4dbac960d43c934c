//! Meeting analysis engine.
//!
//! Turns a stored recording (audio, screenshots, context text) into a
//! Markdown analysis produced by a multi-modal model, with classified
//! retries, payload reduction on capacity errors and live progress.

pub mod classifier;
pub mod document;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod payload;
pub mod ports;
pub mod progress;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod stager;

pub use classifier::classify;
pub use document::AnalysisDocument;
pub use error::{ErrorClassification, ErrorKind, Failure, ProviderError};
pub use orchestrator::{AnalysisJob, AnalysisOptions, JobOutcome, Orchestrator};
pub use ports::{
    AudioTrack, JobStatus, JobStore, RecordingStore, Settings, SettingsProvider, StoredRecording,
};
pub use progress::{
    Frame, NullSink, ProgressChannel, ProgressEvent, ProgressSink, ProgressTransport,
    TransportError,
};
pub use providers::{GeminiProvider, ModelProvider};
pub use retry::RetryPolicy;
