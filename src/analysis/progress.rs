//! Progress reporting for analysis jobs.
//!
//! Two layers:
//! - [`ProgressSink`] is the port the pipeline reports stages through. Lower
//!   layers (stager, fallback controller) only ever see this trait.
//! - [`ProgressChannel`] pushes events onto a [`ProgressTransport`] (SSE
//!   stream, terminal) and guarantees that a dead or finished transport can
//!   never raise back into the job. A result that is already persisted must
//!   not be turned into an error because its "done" event could not be
//!   delivered.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Event emitted while a job runs. Exactly one terminal event ends a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub enum ProgressEvent {
    Stage {
        label: String,
        detail: Option<String>,
        percent: Option<u8>,
    },
    Completed {
        result: String,
    },
    Failed {
        error: String,
    },
}

impl ProgressEvent {
    pub fn stage(label: impl Into<String>) -> Self {
        Self::Stage {
            label: label.into(),
            detail: None,
            percent: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Stage { .. })
    }
}

/// Wire format: `{stage, detail?, percent?}` or `{done: true, result?, error?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ProgressEvent> for WireEvent {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Stage {
                label,
                detail,
                percent,
            } => Self {
                stage: Some(label),
                detail,
                percent,
                ..Default::default()
            },
            ProgressEvent::Completed { result } => Self {
                done: Some(true),
                result: Some(result),
                ..Default::default()
            },
            ProgressEvent::Failed { error } => Self {
                done: Some(true),
                error: Some(error),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<WireEvent> for ProgressEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        if wire.done == Some(true) {
            return match (wire.result, wire.error) {
                (_, Some(error)) => Ok(Self::Failed { error }),
                (Some(result), None) => Ok(Self::Completed { result }),
                (None, None) => Err("terminal event carries neither result nor error".to_string()),
            };
        }

        match wire.stage {
            Some(label) => Ok(Self::Stage {
                label,
                detail: wire.detail,
                percent: wire.percent,
            }),
            None => Err("event has neither a stage nor a done flag".to_string()),
        }
    }
}

/// Port through which pipeline steps report progress.
pub trait ProgressSink: Send + Sync {
    fn stage(&self, label: &str, detail: Option<String>, percent: Option<u8>);
}

/// Sink that drops everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn stage(&self, _label: &str, _detail: Option<String>, _percent: Option<u8>) {}
}

/// A unit written onto a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(ProgressEvent),
    /// Payload-free keepalive; parsers ignore it.
    Keepalive,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("transport write failed: {0}")]
    Write(String),
}

/// Push stream to one caller. Writes may fail; the channel absorbs that.
pub trait ProgressTransport: Send + Sync {
    fn write(&self, frame: Frame) -> Result<(), TransportError>;

    /// Whether the peer is known to be gone.
    fn is_closed(&self) -> bool;

    /// End the stream.
    fn close(&self) -> Result<(), TransportError>;
}

/// Write-safe event stream for one job.
pub struct ProgressChannel<T: ProgressTransport> {
    transport: T,
    peer_gone: AtomicBool,
    finalized: AtomicBool,
    terminal_sent: AtomicBool,
}

impl<T: ProgressTransport> ProgressChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            peer_gone: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            terminal_sent: AtomicBool::new(false),
        }
    }

    /// Push an event. Never fails; a write error marks the peer as gone.
    /// Only the first terminal event is written; nothing follows it.
    pub fn send(&self, event: ProgressEvent) {
        if self.terminal_sent.load(Ordering::SeqCst) {
            debug!("Dropping progress event sent after the terminal event");
            return;
        }
        if event.is_terminal() && self.terminal_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write(Frame::Event(event));
    }

    /// Push a keepalive frame, with the same never-fail rules as `send`.
    pub fn keepalive(&self) {
        self.write(Frame::Keepalive);
    }

    /// Close the stream. Idempotent, never fails.
    pub fn final_end(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.transport.close() {
            debug!("Progress transport close failed (ignored): {}", e);
        }
    }

    pub fn is_peer_gone(&self) -> bool {
        self.peer_gone.load(Ordering::SeqCst)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn is_writable(&self) -> bool {
        if self.is_finalized() || self.is_peer_gone() {
            return false;
        }
        if self.transport.is_closed() {
            self.mark_peer_gone("close notification");
            return false;
        }
        true
    }

    fn write(&self, frame: Frame) {
        if !self.is_writable() {
            return;
        }
        if let Err(e) = self.transport.write(frame) {
            self.mark_peer_gone(&e.to_string());
        }
    }

    fn mark_peer_gone(&self, reason: &str) {
        if !self.peer_gone.swap(true, Ordering::SeqCst) {
            warn!(
                "Progress peer gone ({}); further progress events are dropped",
                reason
            );
        }
    }
}

impl<T: ProgressTransport> ProgressSink for ProgressChannel<T> {
    fn stage(&self, label: &str, detail: Option<String>, percent: Option<u8>) {
        self.send(ProgressEvent::Stage {
            label: label.to_string(),
            detail,
            percent,
        });
    }
}
