use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::error::ProviderError;
use super::ports::Settings;

pub mod gemini;

pub use gemini::GeminiProvider;

/// Ingestion state of a file staged on the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
        }
    }
}

/// A file handed to the provider's asynchronous file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Provider-side handle used for polling (e.g. `files/abc123`).
    pub name: String,
    /// URI referenced from model requests.
    pub uri: String,
    pub mime_type: String,
    pub state: FileState,
}

/// One part of a multi-modal model request.
#[derive(Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    InlineBinary { data: Arc<[u8]>, mime_type: String },
    StagedFileRef { file_uri: String, mime_type: String },
}

impl RequestPart {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::InlineBinary { mime_type, .. } | Self::StagedFileRef { mime_type, .. } => {
                Some(mime_type)
            }
        }
    }
}

impl fmt::Debug for RequestPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::InlineBinary { data, mime_type } => f
                .debug_struct("InlineBinary")
                .field("bytes", &data.len())
                .field("mime_type", mime_type)
                .finish(),
            Self::StagedFileRef {
                file_uri,
                mime_type,
            } => f
                .debug_struct("StagedFileRef")
                .field("file_uri", file_uri)
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

/// Remote multi-modal model service.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit a file for asynchronous ingestion.
    async fn upload_file(
        &self,
        settings: &Settings,
        path: &Path,
        mime_type: &str,
    ) -> Result<StagedFile, ProviderError>;

    /// Fetch the current state of a staged file.
    async fn get_file(&self, settings: &Settings, name: &str) -> Result<StagedFile, ProviderError>;

    /// Run the model over `parts` and return its text output.
    async fn generate(
        &self,
        settings: &Settings,
        parts: &[RequestPart],
    ) -> Result<String, ProviderError>;
}
