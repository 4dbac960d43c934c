//! Remote file staging.
//!
//! Large audio is uploaded to the provider's file store, which ingests it
//! asynchronously. The stager polls the file until it turns `ACTIVE`, fails,
//! or the polling ceiling is reached. One `stage` call is one upload; the
//! caller wraps it in the retry engine for independent attempts.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::ProviderError;
use super::ports::Settings;
use super::progress::ProgressSink;
use super::providers::{FileState, ModelProvider, StagedFile};

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// 120 polls at 3s: a 6 minute ceiling.
pub const MAX_POLLS: u32 = 120;

pub struct FileStager<'a> {
    provider: &'a dyn ModelProvider,
    settings: &'a Settings,
    poll_interval: Duration,
    max_polls: u32,
}

impl<'a> FileStager<'a> {
    pub fn new(provider: &'a dyn ModelProvider, settings: &'a Settings) -> Self {
        Self {
            provider,
            settings,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls.max(1);
        self
    }

    /// Upload `path` and wait until the provider reports it usable.
    pub async fn stage(
        &self,
        path: &Path,
        mime_type: &str,
        sink: &dyn ProgressSink,
    ) -> Result<StagedFile, ProviderError> {
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
        sink.stage("Uploading audio", file_name, None);

        let mut file = self.provider.upload_file(self.settings, path, mime_type).await?;

        for poll in 1..=self.max_polls {
            match file.state {
                FileState::Active => {
                    info!("Staged file {} is active after {} polls", file.name, poll - 1);
                    return Ok(file);
                }
                FileState::Failed => {
                    error!("Provider failed to process staged file {}", file.name);
                    return Err(ProviderError::new(
                        "The provider failed to process the uploaded audio",
                    ));
                }
                FileState::Processing => {
                    let elapsed = self.poll_interval * poll;
                    debug!(
                        "Staged file {} still processing (poll {}/{})",
                        file.name, poll, self.max_polls
                    );
                    sink.stage(
                        "Processing audio",
                        Some(format!("{}s elapsed", elapsed.as_secs())),
                        None,
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    file = self.provider.get_file(self.settings, &file.name).await?;
                }
            }
        }

        if file.state == FileState::Active {
            return Ok(file);
        }

        warn!(
            "Staged file {} was still processing after {} seconds",
            file.name,
            (self.poll_interval * self.max_polls).as_secs()
        );
        Err(ProviderError::new(
            "The uploaded audio was still processing when the polling limit was reached",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::classify;
    use crate::analysis::error::ErrorKind;
    use crate::analysis::progress::NullSink;
    use crate::analysis::providers::RequestPart;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Provider whose `get_file` walks through a scripted list of states.
    struct ScriptedFiles {
        initial: FileState,
        polls: Mutex<Vec<FileState>>,
        get_calls: AtomicU32,
    }

    impl ScriptedFiles {
        fn new(initial: FileState, polls: Vec<FileState>) -> Self {
            Self {
                initial,
                polls: Mutex::new(polls),
                get_calls: AtomicU32::new(0),
            }
        }

        fn file(state: FileState) -> StagedFile {
            StagedFile {
                name: "files/meeting-403".to_string(),
                uri: "https://files/meeting".to_string(),
                mime_type: "audio/mpeg".to_string(),
                state,
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedFiles {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn upload_file(
            &self,
            _settings: &Settings,
            _path: &Path,
            _mime_type: &str,
        ) -> Result<StagedFile, ProviderError> {
            Ok(Self::file(self.initial))
        }

        async fn get_file(&self, _settings: &Settings, _name: &str) -> Result<StagedFile, ProviderError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock().unwrap();
            let state = if polls.is_empty() {
                FileState::Processing
            } else {
                polls.remove(0)
            };
            Ok(Self::file(state))
        }

        async fn generate(
            &self,
            _settings: &Settings,
            _parts: &[RequestPart],
        ) -> Result<String, ProviderError> {
            unreachable!()
        }
    }

    fn settings() -> Settings {
        Settings {
            api_key: "key".to_string(),
            model: "gemini-2.5-flash".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_waits_until_active() {
        let provider = ScriptedFiles::new(
            FileState::Processing,
            vec![FileState::Processing, FileState::Active],
        );
        let settings = settings();
        let started = Instant::now();

        let file = FileStager::new(&provider, &settings)
            .stage(Path::new("/tmp/meeting.mp3"), "audio/mpeg", &NullSink)
            .await
            .unwrap();

        assert_eq!(file.state, FileState::Active);
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), POLL_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_returns_immediately_when_already_active() {
        let provider = ScriptedFiles::new(FileState::Active, vec![]);
        let settings = settings();

        let file = FileStager::new(&provider, &settings)
            .stage(Path::new("/tmp/meeting.mp3"), "audio/mpeg", &NullSink)
            .await
            .unwrap();

        assert_eq!(file.uri, "https://files/meeting");
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_failed_state() {
        let provider = ScriptedFiles::new(FileState::Processing, vec![FileState::Failed]);
        let settings = settings();

        let err = FileStager::new(&provider, &settings)
            .stage(Path::new("/tmp/meeting.mp3"), "audio/mpeg", &NullSink)
            .await
            .unwrap_err();

        assert!(err.message.contains("failed to process"));
        assert!(!err.message.contains("403"));
        assert_eq!(classify(&err).kind, ErrorKind::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_ceiling_is_retryable() {
        let provider = ScriptedFiles::new(FileState::Processing, vec![]);
        let settings = settings();
        let started = Instant::now();

        let err = FileStager::new(&provider, &settings)
            .stage(Path::new("/tmp/meeting.mp3"), "audio/mpeg", &NullSink)
            .await
            .unwrap_err();

        assert!(err.message.contains("polling limit"));
        let classification = classify(&err);
        assert!(classification.retryable);
        assert_eq!(classification.kind, ErrorKind::Unknown);
        assert_eq!(provider.get_calls.load(Ordering::SeqCst), MAX_POLLS);
        assert_eq!(started.elapsed(), Duration::from_secs(360));
    }
}
