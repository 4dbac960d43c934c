//! Collaborator contracts of the analysis engine.
//!
//! The engine does not own storage or configuration. It consumes a stored
//! recording and a settings value, and reports status transitions and the
//! final document to a job store.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::document::AnalysisDocument;

/// Provider credential and model selection for one job.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Source of the active provider settings. Read once per job.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Result<Settings>;
}

/// Audio or video track of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub mime_type: String,
}

/// A recording as handed over by the recording store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecording {
    pub audio: Option<AudioTrack>,
    /// Screenshots in timeline order.
    pub images: Vec<PathBuf>,
    /// Transcript and other free-form context.
    pub context: Option<String>,
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn load_recording(&self, job_id: i64) -> Result<Option<StoredRecording>>;
}

/// Persisted lifecycle of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Durable job state. Both operations are atomic once they return.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn set_status(&self, job_id: i64, status: JobStatus, error: Option<&str>) -> Result<()>;

    async fn save_result(&self, job_id: i64, document: &AnalysisDocument) -> Result<()>;
}
