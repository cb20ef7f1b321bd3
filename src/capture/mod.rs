//! Screen capture session lifecycle
//!
//! The frames themselves are produced by a separate recording extension and
//! reach the media pipeline through the producer; this module only sequences
//! "ask it to start", "wait for ready", "tell the pipeline", and treats an
//! irrecoverable producer end like an explicit stop.

mod controller;
mod producer;

pub use controller::{CaptureHooks, CaptureSessionController};
pub use producer::{CapturerEventSink, FrameProducer};

use serde::Serialize;

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum CaptureState {
    #[default]
    Stopped = 0,
    /// Producer asked to start, waiting for its ready signal
    Starting = 1,
    Capturing = 2,
}

impl CaptureState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureState::Starting,
            2 => CaptureState::Capturing,
            _ => CaptureState::Stopped,
        }
    }
}

/// Events emitted by the capture controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Producer is delivering frames
    Ready,
    /// Producer ended irrecoverably (or never became ready)
    Ended,
    /// Capture stopped on request
    Stopped,
}
