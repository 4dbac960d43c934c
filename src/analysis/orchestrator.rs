//! Runs one analysis job from `pending` to `completed` or `error`.
//!
//! Lifecycle:
//! 1. persist `processing` (before any remote call)
//! 2. start the keepalive timer and emit `Starting`
//! 3. prepare audio, then walk the fallback ladder; each rung assembles a
//!    payload and calls the model under the retry engine
//! 4. persist the document, then `completed`, then emit the result
//! 5. on failure persist `error` with a message, then emit it
//! 6. always stop the keepalive timer and close the channel
//!
//! The progress channel never fails a job. Once `completed` is persisted a
//! broken transport only means the caller misses the final event.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::document::{AnalysisDocument, RunDetails};
use super::error::Failure;
use super::fallback::{run_with_fallback, strategy_ladder};
use super::payload::{subsample, AudioMode, PayloadAssembler, PayloadLimits};
use super::ports::{JobStatus, JobStore, Settings, StoredRecording};
use super::progress::{ProgressChannel, ProgressEvent, ProgressSink, ProgressTransport};
use super::providers::ModelProvider;
use super::retry::{describe_attempt, with_retry, RetryPolicy};
use super::stager::{MAX_POLLS, POLL_INTERVAL};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub job_id: i64,
    pub recording: StoredRecording,
    pub settings: Settings,
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub retry: RetryPolicy,
    pub limits: PayloadLimits,
    pub keepalive_interval: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            limits: PayloadLimits::default(),
            keepalive_interval: KEEPALIVE_INTERVAL,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }
}

/// Final state of a run, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: i64,
    pub status: JobStatus,
    pub document: Option<AnalysisDocument>,
    pub error: Option<String>,
}

impl JobOutcome {
    fn completed(job_id: i64, document: AnalysisDocument) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            document: Some(document),
            error: None,
        }
    }

    fn failed(job_id: i64, message: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Error,
            document: None,
            error: Some(message),
        }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    jobs: Arc<dyn JobStore>,
    options: AnalysisOptions,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, jobs: Arc<dyn JobStore>) -> Self {
        Self::with_options(provider, jobs, AnalysisOptions::default())
    }

    pub fn with_options(
        provider: Arc<dyn ModelProvider>,
        jobs: Arc<dyn JobStore>,
        options: AnalysisOptions,
    ) -> Self {
        Self {
            provider,
            jobs,
            options,
        }
    }

    /// Run the job to a terminal state. Never returns an error: every
    /// failure ends up persisted as `error` and reported on the channel.
    pub async fn run<T>(&self, job: AnalysisJob, channel: Arc<ProgressChannel<T>>) -> JobOutcome
    where
        T: ProgressTransport + 'static,
    {
        let job_id = job.job_id;
        info!("Starting analysis job {}", job_id);

        if let Err(e) = self
            .jobs
            .set_status(job_id, JobStatus::Processing, None)
            .await
        {
            error!("Failed to mark job {} as processing: {:#}", job_id, e);
            let outcome = self
                .fail(
                    job_id,
                    format!("Could not start the analysis: {}", e),
                    channel.as_ref(),
                )
                .await;
            channel.final_end();
            return outcome;
        }

        let keepalive = spawn_keepalive(channel.clone(), self.options.keepalive_interval);
        channel.send(ProgressEvent::stage("Starting"));

        let outcome = match self.analyze(&job, channel.as_ref()).await {
            Ok(document) => self.complete(job_id, document, channel.as_ref()).await,
            Err(failure) => {
                warn!(
                    "Analysis job {} failed with {}: {}",
                    job_id,
                    failure.kind(),
                    failure.classification().detail
                );
                self.fail(job_id, failure.user_message().to_string(), channel.as_ref())
                    .await
            }
        };

        keepalive.cancel();
        channel.final_end();
        outcome
    }

    async fn analyze(
        &self,
        job: &AnalysisJob,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisDocument, Failure> {
        let provider = self.provider.as_ref();
        let settings = &job.settings;
        let policy = &self.options.retry;

        let assembler = PayloadAssembler::new(provider, settings, self.options.limits, *policy)
            .with_stager_polling(self.options.poll_interval, self.options.max_polls);
        let assembler = &assembler;

        let audio = match &job.recording.audio {
            Some(track) => Some(assembler.prepare_audio(track, sink).await?),
            None => None,
        };
        let audio = audio.as_ref();

        let images = subsample(&job.recording.images, self.options.limits.max_images);
        let images = &images;
        let context = job.recording.context.as_deref();

        let ((raw, images_sent), strategy) = run_with_fallback(
            &strategy_ladder(images.len()),
            move |strategy| {
                let subset = subsample(images, strategy.image_count);
                async move {
                    sink.stage("Preparing request", Some(strategy.label.to_string()), None);
                    let payload = assembler.assemble(audio, &subset, context).await;
                    let parts = &payload.parts;

                    sink.stage(
                        "Analyzing",
                        Some(format!(
                            "{} with {} images",
                            settings.model, payload.images_included
                        )),
                        None,
                    );
                    let raw = with_retry(
                        policy,
                        move |_| provider.generate(settings, parts),
                        |attempt| {
                            sink.stage("Retrying analysis", Some(describe_attempt(attempt)), None)
                        },
                    )
                    .await?;
                    Ok::<_, Failure>((raw, payload.images_included))
                }
            },
            sink,
        )
        .await?;

        sink.stage("Saving results", None, None);
        Ok(AnalysisDocument::from_raw(
            raw,
            &RunDetails {
                model: settings.model.clone(),
                provider: provider.name(),
                strategy: strategy.label,
                images_sent,
                audio: audio.map(|a| a.mode).unwrap_or(AudioMode::Absent),
            },
        ))
    }

    async fn complete<T: ProgressTransport>(
        &self,
        job_id: i64,
        document: AnalysisDocument,
        channel: &ProgressChannel<T>,
    ) -> JobOutcome {
        let persisted = async {
            self.jobs.save_result(job_id, &document).await?;
            self.jobs
                .set_status(job_id, JobStatus::Completed, None)
                .await
        }
        .await;

        if let Err(e) = persisted {
            error!("Failed to persist result of job {}: {:#}", job_id, e);
            return self
                .fail(
                    job_id,
                    format!("The analysis finished but could not be saved: {}", e),
                    channel,
                )
                .await;
        }

        info!("Analysis job {} completed", job_id);
        channel.send(ProgressEvent::Completed {
            result: document.raw.clone(),
        });
        JobOutcome::completed(job_id, document)
    }

    async fn fail<T: ProgressTransport>(
        &self,
        job_id: i64,
        message: String,
        channel: &ProgressChannel<T>,
    ) -> JobOutcome {
        if let Err(e) = self
            .jobs
            .set_status(job_id, JobStatus::Error, Some(&message))
            .await
        {
            error!("Failed to persist error state of job {}: {:#}", job_id, e);
        }
        channel.send(ProgressEvent::Failed {
            error: message.clone(),
        });
        JobOutcome::failed(job_id, message)
    }
}

/// Emit a keepalive frame every `interval` until the returned token is
/// cancelled.
fn spawn_keepalive<T>(channel: Arc<ProgressChannel<T>>, interval: Duration) -> CancellationToken
where
    T: ProgressTransport + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => channel.keepalive(),
            }
        }
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::error::ProviderError;
    use crate::analysis::progress::{Frame, TransportError};
    use crate::analysis::providers::{RequestPart, StagedFile};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Shared event log so tests can check ordering across store and
    /// transport.
    type Log = Arc<Mutex<Vec<String>>>;

    struct MemoryJobs {
        log: Log,
        fail_save: bool,
        fail_first_status: AtomicBool,
    }

    #[async_trait]
    impl JobStore for MemoryJobs {
        async fn set_status(
            &self,
            _job_id: i64,
            status: JobStatus,
            error: Option<&str>,
        ) -> anyhow::Result<()> {
            if self.fail_first_status.swap(false, Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            let entry = match error {
                Some(e) => format!("status:{}:{}", status.as_str(), e),
                None => format!("status:{}", status.as_str()),
            };
            self.log.lock().unwrap().push(entry);
            Ok(())
        }

        async fn save_result(&self, _job_id: i64, document: &AnalysisDocument) -> anyhow::Result<()> {
            if self.fail_save {
                anyhow::bail!("disk full");
            }
            self.log.lock().unwrap().push(format!("saved:{}", document.raw));
            Ok(())
        }
    }

    struct LogTransport {
        log: Log,
        break_on_terminal: bool,
        broken: AtomicBool,
    }

    impl ProgressTransport for LogTransport {
        fn write(&self, frame: Frame) -> Result<(), TransportError> {
            if let Frame::Event(event) = frame {
                if event.is_terminal() && self.break_on_terminal {
                    self.broken.store(true, Ordering::SeqCst);
                    return Err(TransportError::Write("connection reset".to_string()));
                }
                let entry = match event {
                    ProgressEvent::Stage { label, .. } => format!("stage:{}", label),
                    ProgressEvent::Completed { result } => format!("done:{}", result),
                    ProgressEvent::Failed { error } => format!("error:{}", error),
                };
                self.log.lock().unwrap().push(entry);
            }
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn close(&self) -> Result<(), TransportError> {
            self.log.lock().unwrap().push("closed".to_string());
            Ok(())
        }
    }

    struct ScriptedModel {
        responses: Mutex<Vec<Result<String, ProviderError>>>,
    }

    #[async_trait]
    impl ModelProvider for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn upload_file(
            &self,
            _settings: &Settings,
            _path: &Path,
            _mime_type: &str,
        ) -> Result<StagedFile, ProviderError> {
            unreachable!()
        }

        async fn get_file(&self, _settings: &Settings, _name: &str) -> Result<StagedFile, ProviderError> {
            unreachable!()
        }

        async fn generate(
            &self,
            _settings: &Settings,
            _parts: &[RequestPart],
        ) -> Result<String, ProviderError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn job() -> AnalysisJob {
        AnalysisJob {
            job_id: 7,
            recording: StoredRecording {
                context: Some("transcript".to_string()),
                ..Default::default()
            },
            settings: Settings {
                api_key: "key".to_string(),
                model: "gemini-2.5-flash".to_string(),
            },
        }
    }

    fn setup(
        responses: Vec<Result<String, ProviderError>>,
        fail_save: bool,
        break_on_terminal: bool,
    ) -> (Orchestrator, Arc<ProgressChannel<LogTransport>>, Log) {
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedModel {
                responses: Mutex::new(responses),
            }),
            Arc::new(MemoryJobs {
                log: log.clone(),
                fail_save,
                fail_first_status: AtomicBool::new(false),
            }),
        );
        let channel = Arc::new(ProgressChannel::new(LogTransport {
            log: log.clone(),
            break_on_terminal,
            broken: AtomicBool::new(false),
        }));
        (orchestrator, channel, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_persists_before_done_event() {
        let (orchestrator, channel, log) = setup(vec![Ok("## Summary\nAll good".to_string())], false, false);

        let outcome = orchestrator.run(job(), channel.clone()).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        let log = log.lock().unwrap().clone();
        assert_eq!(log.first().map(String::as_str), Some("status:processing"));
        assert_eq!(log[1], "stage:Starting");
        let saved = log.iter().position(|e| e.starts_with("saved:")).unwrap();
        let completed = log.iter().position(|e| e == "status:completed").unwrap();
        let done = log.iter().position(|e| e.starts_with("done:")).unwrap();
        assert!(saved < completed && completed < done);
        assert_eq!(log.last().map(String::as_str), Some("closed"));
        assert!(channel.is_finalized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_transport_after_persist_keeps_completed() {
        let (orchestrator, channel, log) = setup(vec![Ok("result".to_string())], false, true);

        let outcome = orchestrator.run(job(), channel.clone()).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(channel.transport().broken.load(Ordering::SeqCst));
        assert!(channel.is_peer_gone());
        let log = log.lock().unwrap().clone();
        assert!(log.contains(&"status:completed".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("status:error")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_sets_error() {
        let (orchestrator, channel, log) = setup(
            vec![Err(ProviderError::with_status(403, "API key not valid"))],
            false,
            false,
        );

        let outcome = orchestrator.run(job(), channel).await;

        assert_eq!(outcome.status, JobStatus::Error);
        let message = outcome.error.unwrap();
        let log = log.lock().unwrap().clone();
        assert!(log.contains(&format!("status:error:{}", message)));
        assert!(log.contains(&format!("error:{}", message)));
        assert!(!log.iter().any(|e| e.starts_with("saved:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_turns_into_error() {
        let (orchestrator, channel, log) = setup(vec![Ok("result".to_string())], true, false);

        let outcome = orchestrator.run(job(), channel).await;

        assert_eq!(outcome.status, JobStatus::Error);
        assert!(outcome.error.unwrap().contains("disk full"));
        let log = log.lock().unwrap().clone();
        assert!(!log.contains(&"status:completed".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("done:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_still_persists_error() {
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedModel {
                responses: Mutex::new(vec![]),
            }),
            Arc::new(MemoryJobs {
                log: log.clone(),
                fail_save: false,
                fail_first_status: AtomicBool::new(true),
            }),
        );
        let channel = Arc::new(ProgressChannel::new(LogTransport {
            log: log.clone(),
            break_on_terminal: false,
            broken: AtomicBool::new(false),
        }));

        let outcome = orchestrator.run(job(), channel.clone()).await;

        assert_eq!(outcome.status, JobStatus::Error);
        let message = outcome.error.unwrap();
        assert!(message.contains("database is locked"));
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                format!("status:error:{}", message),
                format!("error:{}", message),
                "closed".to_string(),
            ]
        );
        assert!(channel.is_finalized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_runs_during_slow_stage() {
        struct SlowModel;

        #[async_trait]
        impl ModelProvider for SlowModel {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn upload_file(
                &self,
                _settings: &Settings,
                _path: &Path,
                _mime_type: &str,
            ) -> Result<StagedFile, ProviderError> {
                unreachable!()
            }

            async fn get_file(&self, _settings: &Settings, _name: &str) -> Result<StagedFile, ProviderError> {
                unreachable!()
            }

            async fn generate(
                &self,
                _settings: &Settings,
                _parts: &[RequestPart],
            ) -> Result<String, ProviderError> {
                tokio::time::sleep(Duration::from_secs(35)).await;
                Ok("late result".to_string())
            }
        }

        #[derive(Default)]
        struct CountingTransport {
            keepalives: Mutex<usize>,
        }

        impl ProgressTransport for CountingTransport {
            fn write(&self, frame: Frame) -> Result<(), TransportError> {
                if frame == Frame::Keepalive {
                    *self.keepalives.lock().unwrap() += 1;
                }
                Ok(())
            }

            fn is_closed(&self) -> bool {
                false
            }

            fn close(&self) -> Result<(), TransportError> {
                Ok(())
            }
        }

        let orchestrator = Orchestrator::new(
            Arc::new(SlowModel),
            Arc::new(MemoryJobs {
                log: Arc::default(),
                fail_save: false,
                fail_first_status: AtomicBool::new(false),
            }),
        );
        let channel = Arc::new(ProgressChannel::new(CountingTransport::default()));

        let outcome = orchestrator.run(job(), channel.clone()).await;
        assert_eq!(outcome.status, JobStatus::Completed);

        let keepalives = *channel.transport().keepalives.lock().unwrap();
        assert_eq!(keepalives, 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*channel.transport().keepalives.lock().unwrap(), 3);
    }
}
