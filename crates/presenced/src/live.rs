//! Continuous camera scanning.
//!
//! A capture thread owns the camera and hands frames to an async loop over
//! a bounded channel. The loop samples every Nth frame, runs the scan
//! pipeline, and emits one message per sampled frame until a face is
//! accepted or something fails. Dropping the event receiver (client gone)
//! ends the loop, which closes the frame channel and releases the camera.

use presence_core::Extractor;
use presence_hw::{CameraError, CameraProvider, Frame};
use presence_store::{ScanOutcome, Scanner};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::state::SharedState;

const FRAME_QUEUE: usize = 2;
const EVENT_QUEUE: usize = 8;

/// What the capture thread reports.
pub enum CaptureEvent {
    Frame(Frame),
    OpenFailed(CameraError),
    ReadFailed(CameraError),
}

/// Live scan state after each emitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Streaming,
    Matched,
    CameraError,
    StoreError,
}

impl LiveState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LiveState::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub state: LiveState,
    pub message: String,
}

impl LiveEvent {
    fn camera_error(message: String) -> Self {
        Self {
            state: LiveState::CameraError,
            message,
        }
    }
}

/// Decides which frames are processed: one in every `stride`.
#[derive(Debug)]
pub struct FrameSampler {
    stride: u64,
    seen: u64,
}

impl FrameSampler {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1) as u64,
            seen: 0,
        }
    }

    /// Count a frame and report whether it should be processed.
    pub fn sample(&mut self) -> bool {
        self.seen += 1;
        self.seen % self.stride == 0
    }
}

/// Map a scan result to the live-scan state it leads to.
pub fn transition(outcome: &ScanOutcome) -> LiveState {
    match outcome {
        ScanOutcome::Present { .. } | ScanOutcome::RecordFailed(_) => LiveState::Matched,
        ScanOutcome::StoreUnavailable(_) => LiveState::StoreError,
        ScanOutcome::NoMatch { .. } | ScanOutcome::NoFace => LiveState::Streaming,
    }
}

/// Text streamed to the client for one sampled frame.
pub fn live_message(outcome: &ScanOutcome) -> String {
    match outcome {
        ScanOutcome::NoFace => "No face detected in the frame".to_string(),
        other => other.to_string(),
    }
}

/// Open the camera on a dedicated thread and stream frames until the
/// receiver is dropped or capture fails.
pub fn spawn_capture(provider: Arc<dyn CameraProvider>) -> mpsc::Receiver<CaptureEvent> {
    let (tx, rx) = mpsc::channel(FRAME_QUEUE);

    let spawned = std::thread::Builder::new()
        .name("presence-capture".into())
        .spawn(move || {
            let mut source = match provider.open() {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(device = provider.device(), error = %e, "cannot open camera");
                    let _ = tx.blocking_send(CaptureEvent::OpenFailed(e));
                    return;
                }
            };
            tracing::info!(device = provider.device(), "capture started");

            loop {
                let event = match source.next_frame() {
                    Ok(frame) => CaptureEvent::Frame(frame),
                    Err(e) => {
                        tracing::warn!(error = %e, "frame capture failed");
                        let _ = tx.blocking_send(CaptureEvent::ReadFailed(e));
                        break;
                    }
                };
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            tracing::info!(device = provider.device(), "capture stopped; camera released");
        });

    if let Err(e) = spawned {
        // The sender was dropped with the closure, so the receiver reports closed.
        tracing::error!(error = %e, "failed to spawn capture thread");
    }

    rx
}

/// Start a live scan for one client and return its event stream.
pub fn spawn(state: SharedState) -> mpsc::Receiver<LiveEvent> {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let frames = spawn_capture(state.camera.clone());
    let stride = state.config.frame_stride;

    tokio::spawn(async move {
        let final_state = run(frames, &state.extractor, &state.scanner, stride, tx).await;
        tracing::info!(state = ?final_state, "live scan finished");
    });

    rx
}

/// Drive the live scan until a terminal state or until the client leaves.
pub async fn run(
    mut frames: mpsc::Receiver<CaptureEvent>,
    extractor: &Extractor,
    scanner: &Scanner,
    stride: usize,
    events: mpsc::Sender<LiveEvent>,
) -> LiveState {
    let mut sampler = FrameSampler::new(stride);

    while let Some(capture) = frames.recv().await {
        let frame = match capture {
            CaptureEvent::Frame(frame) => frame,
            CaptureEvent::OpenFailed(e) => {
                let _ = events
                    .send(LiveEvent::camera_error(format!("Error: cannot open camera ({e})")))
                    .await;
                return LiveState::CameraError;
            }
            CaptureEvent::ReadFailed(e) => {
                let _ = events
                    .send(LiveEvent::camera_error(format!("Error: cannot capture frame ({e})")))
                    .await;
                return LiveState::CameraError;
            }
        };

        if events.is_closed() {
            tracing::debug!("client disconnected");
            return LiveState::Streaming;
        }
        if !sampler.sample() {
            continue;
        }

        let outcome = scanner.scan(extractor.from_frame(&frame.image).await).await;
        let state = transition(&outcome);
        let event = LiveEvent {
            state,
            message: live_message(&outcome),
        };

        if events.send(event).await.is_err() {
            tracing::debug!("client disconnected");
            return state;
        }
        if state.is_terminal() {
            return state;
        }
    }

    let _ = events
        .send(LiveEvent::camera_error("Error: camera stream ended".to_string()))
        .await;
    LiveState::CameraError
}
