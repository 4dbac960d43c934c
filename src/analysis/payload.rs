//! Builds the multi-part model request for a recording.
//!
//! Part order is fixed: the audio part (if any), then image parts in
//! timeline order, then exactly one trailing text part.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{ErrorClassification, ErrorKind, Failure};
use super::ports::{AudioTrack, Settings};
use super::progress::ProgressSink;
use super::prompt::{build_prompt, Attachments};
use super::providers::{ModelProvider, RequestPart};
use super::retry::{describe_attempt, with_retry, RetryPolicy};
use super::stager::{FileStager, MAX_POLLS, POLL_INTERVAL};
use crate::media::mime_type_for_path;

const MB: u64 = 1024 * 1024;

/// Size limits applied while assembling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    /// Audio up to this size is sent inline; larger audio is staged.
    pub inline_audio_bytes: u64,
    /// Largest audio that may still be inlined when staging fails.
    pub inline_fallback_bytes: u64,
    pub max_images: usize,
    /// Images above this size are skipped.
    pub max_image_bytes: u64,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            inline_audio_bytes: 15 * MB,
            inline_fallback_bytes: 20 * MB,
            max_images: 40,
            max_image_bytes: 3 * MB / 2,
        }
    }
}

/// How the audio reached the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Inline,
    Staged,
    Absent,
}

impl AudioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Staged => "staged",
            Self::Absent => "none",
        }
    }
}

/// Audio part ready to be placed at the head of every request of a job.
#[derive(Debug, Clone)]
pub struct PreparedAudio {
    pub part: RequestPart,
    pub mode: AudioMode,
}

/// An assembled request.
#[derive(Debug, Clone)]
pub struct Payload {
    pub parts: Vec<RequestPart>,
    pub images_included: usize,
    pub audio_mode: AudioMode,
}

/// Indices of `count` items spread evenly over `len`, rounding down.
pub fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    if count >= len {
        return (0..len).collect();
    }
    (0..count).map(|i| i * len / count).collect()
}

pub fn subsample<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    sample_indices(items.len(), count)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

pub struct PayloadAssembler<'a> {
    provider: &'a dyn ModelProvider,
    settings: &'a Settings,
    limits: PayloadLimits,
    retry: RetryPolicy,
    poll_interval: std::time::Duration,
    max_polls: u32,
}

impl<'a> PayloadAssembler<'a> {
    pub fn new(
        provider: &'a dyn ModelProvider,
        settings: &'a Settings,
        limits: PayloadLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            settings,
            limits,
            retry,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }

    pub fn with_stager_polling(mut self, poll_interval: std::time::Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    /// Turn the audio track into a request part: inline when small, staged
    /// on the provider when large, inline again if staging fails and the
    /// file is still small enough.
    pub async fn prepare_audio(
        &self,
        track: &AudioTrack,
        sink: &dyn ProgressSink,
    ) -> Result<PreparedAudio, Failure> {
        let size = tokio::fs::metadata(&track.path)
            .await
            .map_err(|e| local_failure(&track.path, e))?
            .len();

        if size <= self.limits.inline_audio_bytes {
            debug!("Sending {} byte audio inline", size);
            return self.inline_audio(track).await;
        }

        info!(
            "Audio is {} MB, staging it on {}",
            size / MB,
            self.provider.name()
        );

        let stager = FileStager::new(self.provider, self.settings)
            .with_polling(self.poll_interval, self.max_polls);
        let stager = &stager;

        let staged = with_retry(
            &self.retry,
            move |_| stager.stage(&track.path, &track.mime_type, sink),
            |attempt| sink.stage("Retrying upload", Some(describe_attempt(attempt)), None),
        )
        .await;

        match staged {
            Ok(file) => Ok(PreparedAudio {
                part: RequestPart::StagedFileRef {
                    file_uri: file.uri,
                    mime_type: file.mime_type,
                },
                mode: AudioMode::Staged,
            }),
            Err(failure) if size <= self.limits.inline_fallback_bytes => {
                warn!(
                    "Staging failed ({}), sending {} MB audio inline instead",
                    failure.kind(),
                    size / MB
                );
                sink.stage(
                    "Sending audio inline",
                    Some("upload failed, falling back to inline audio".to_string()),
                    None,
                );
                self.inline_audio(track).await
            }
            Err(failure) => Err(failure),
        }
    }

    async fn inline_audio(&self, track: &AudioTrack) -> Result<PreparedAudio, Failure> {
        let data = tokio::fs::read(&track.path)
            .await
            .map_err(|e| local_failure(&track.path, e))?;
        Ok(PreparedAudio {
            part: RequestPart::InlineBinary {
                data: Arc::from(data),
                mime_type: track.mime_type.clone(),
            },
            mode: AudioMode::Inline,
        })
    }

    /// Assemble the ordered request parts.
    pub async fn assemble(
        &self,
        audio: Option<&PreparedAudio>,
        images: &[PathBuf],
        context: Option<&str>,
    ) -> Payload {
        let mut parts = Vec::with_capacity(images.len().min(self.limits.max_images) + 2);

        if let Some(audio) = audio {
            parts.push(audio.part.clone());
        }

        let mut images_included = 0;
        for path in subsample(images, self.limits.max_images) {
            if let Some(part) = self.load_image(&path).await {
                parts.push(part);
                images_included += 1;
            }
        }

        let prompt = build_prompt(
            context,
            Attachments {
                audio: audio.is_some(),
                images: images_included,
            },
        );
        parts.push(RequestPart::Text(prompt));

        Payload {
            parts,
            images_included,
            audio_mode: audio.map(|a| a.mode).unwrap_or(AudioMode::Absent),
        }
    }

    async fn load_image(&self, path: &Path) -> Option<RequestPart> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Skipping unreadable image {:?}: {}", path, e);
                return None;
            }
        };

        if size > self.limits.max_image_bytes {
            warn!(
                "Skipping image {:?}: {} KB exceeds the {} KB limit",
                path,
                size / 1024,
                self.limits.max_image_bytes / 1024
            );
            return None;
        }

        match tokio::fs::read(path).await {
            Ok(data) => Some(RequestPart::InlineBinary {
                data: Arc::from(data),
                mime_type: mime_type_for_path(path).to_string(),
            }),
            Err(e) => {
                warn!("Skipping unreadable image {:?}: {}", path, e);
                None
            }
        }
    }
}

/// A recording file that cannot be read locally. Never passed through
/// `classify`: paths may contain digits that parse as status codes.
fn local_failure(path: &Path, err: std::io::Error) -> Failure {
    warn!("Cannot read recording file {:?}: {}", path, err);
    Failure::Terminal(ErrorClassification {
        kind: ErrorKind::InvalidRequest,
        retryable: false,
        wait_hint: None,
        user_message: format!(
            "The recording file {} is missing or unreadable ({}). Check that it still \
             exists where it was imported from, or import the recording again.",
            path.display(),
            err
        ),
        detail: format!("{:?}: {}", path, err),
    })
}
