//! Server-sent event transport for analysis progress.
//!
//! The job writes frames into an unbounded channel; the HTTP response
//! drains it as an SSE stream. When the client goes away axum drops the
//! stream and its receiver, which the job observes through `is_closed`.

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::analysis::{Frame, ProgressEvent, ProgressTransport, TransportError};

pub struct SseTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

/// A transport and the receiving end for the response stream.
pub fn sse_transport() -> (SseTransport, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SseTransport {
            tx: Mutex::new(Some(tx)),
        },
        rx,
    )
}

impl ProgressTransport for SseTransport {
    fn write(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::Disconnected),
        }
    }

    fn is_closed(&self) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the response stream.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}

/// SSE response for a job. Ends when the job closes its channel or after
/// `timeout`; the job keeps running in the latter case.
pub fn progress_stream(
    mut rx: mpsc::UnboundedReceiver<Frame>,
    timeout: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("SSE: progress stream timed out after {}s", timeout.as_secs());
                    let notice = ProgressEvent::Stage {
                        label: "Still running".to_string(),
                        detail: Some("Progress stream timed out; the analysis continues in the background".to_string()),
                        percent: None,
                    };
                    if let Some(event) = to_sse(&notice) {
                        yield Ok(event);
                    }
                    break;
                }
                frame = rx.recv() => match frame {
                    Some(Frame::Event(event)) => {
                        if let Some(event) = to_sse(&event) {
                            yield Ok(event);
                        }
                    }
                    Some(Frame::Keepalive) => {
                        debug!("SSE: Sending keepalive");
                        yield Ok(Event::default().comment("keepalive"));
                    }
                    None => break,
                }
            }
        }
    };

    Sse::new(stream)
}

fn to_sse(event: &ProgressEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("SSE: Failed to serialize progress event: {}", e);
            None
        }
    }
}
