//! Frame producer contract

use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use super::controller::CaptureCommand;
use crate::error::CaptureError;
use crate::ipc::CaptureChannel;

/// A component that feeds frames from the recording extension into the
/// media pipeline.
///
/// `start` should return quickly; readiness and irrecoverable failure are
/// reported later through the [`CapturerEventSink`], from any thread.
pub trait FrameProducer: Send {
    /// Begin producing frames from the shared channel
    fn start(&mut self, channel: &CaptureChannel, events: CapturerEventSink) -> Result<(), CaptureError>;

    /// Stop producing frames and release resources
    fn stop(&mut self);
}

/// Producer-side delegate for one capture session.
///
/// Each start hands out a sink stamped with a new generation, so signals
/// from a previous session are recognised and dropped.
#[derive(Clone)]
pub struct CapturerEventSink {
    tx: mpsc::UnboundedSender<CaptureCommand>,
    generation: u64,
}

impl CapturerEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CaptureCommand>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// The producer is ready to deliver frames
    pub fn capturer_ready(&self) -> bool {
        self.send(CaptureCommand::Ready {
            generation: self.generation,
        })
    }

    /// The producer ended and cannot recover without a fresh start
    pub fn capturer_did_end(&self) -> bool {
        self.send(CaptureCommand::DidEnd {
            generation: self.generation,
        })
    }

    fn send(&self, cmd: CaptureCommand) -> bool {
        if self.tx.send(cmd).is_err() {
            debug!("Capture controller gone, dropping producer signal");
            return false;
        }
        true
    }
}

impl fmt::Debug for CapturerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturerEventSink")
            .field("generation", &self.generation)
            .finish()
    }
}
