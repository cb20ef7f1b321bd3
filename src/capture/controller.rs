//! Capture session controller
//!
//! Owns the producer and its start/stop orchestration on a single task.
//! Start and stop are idempotent; producer signals are applied in order
//! with application requests.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::producer::{CapturerEventSink, FrameProducer};
use super::{CaptureEvent, CaptureState};
use crate::config::CaptureConfig;
use crate::error::BridgeError;
use crate::ipc::CaptureChannel;

type VoidHook = Box<dyn Fn() + Send>;

/// Closures invoked on capture transitions. Unset hooks are skipped.
#[derive(Default)]
pub struct CaptureHooks {
    on_capture_ready: Option<VoidHook>,
    on_capture_ended: Option<VoidHook>,
}

impl CaptureHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired once per start, when the producer reports ready
    pub fn on_capture_ready(mut self, hook: impl Fn() + Send + 'static) -> Self {
        self.on_capture_ready = Some(Box::new(hook));
        self
    }

    /// Fired when the producer ends irrecoverably or never becomes ready
    pub fn on_capture_ended(mut self, hook: impl Fn() + Send + 'static) -> Self {
        self.on_capture_ended = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for CaptureHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHooks")
            .field("on_capture_ready", &self.on_capture_ready.is_some())
            .field("on_capture_ended", &self.on_capture_ended.is_some())
            .finish()
    }
}

pub(crate) enum CaptureCommand {
    Start,
    Stop,
    Ready { generation: u64 },
    DidEnd { generation: u64 },
    Synchronize(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the capture session actor
pub struct CaptureSessionController {
    cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
    state: Arc<AtomicU8>,
    events_tx: broadcast::Sender<CaptureEvent>,
    task: Option<JoinHandle<()>>,
}

impl CaptureSessionController {
    /// Spawn the controller around a producer. Must be called from within
    /// a tokio runtime.
    pub fn new<P>(producer: P, hooks: CaptureHooks, config: &CaptureConfig) -> Self
    where
        P: FrameProducer + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let state = Arc::new(AtomicU8::new(CaptureState::Stopped as u8));

        let actor = CaptureActor {
            producer: Box::new(producer),
            hooks,
            config: config.clone(),
            cmd_tx: cmd_tx.clone(),
            capture_state: CaptureState::Stopped,
            generation: 0,
            deadline: None,
            state: state.clone(),
            events_tx: events_tx.clone(),
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        Self {
            cmd_tx,
            state,
            events_tx,
            task: Some(task),
        }
    }

    /// Start capturing. No-op unless stopped.
    pub fn start_capture(&self) {
        self.send(CaptureCommand::Start);
    }

    /// Stop capturing. No-op when already stopped.
    pub fn stop_capture(&self) {
        self.send(CaptureCommand::Stop);
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events_tx.subscribe()
    }

    /// Wait until everything queued before this call has been applied
    pub async fn synchronize(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CaptureCommand::Synchronize(tx))
            .map_err(|_| BridgeError::ControllerClosed("capture"))?;
        rx.await.map_err(|_| BridgeError::ControllerClosed("capture"))
    }

    /// Stop the actor and wait for it to exit. A running producer is stopped first.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(CaptureCommand::Stop);
        let _ = self.cmd_tx.send(CaptureCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture controller task failed: {}", e);
            }
        }
    }

    fn send(&self, cmd: CaptureCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("Capture controller has shut down, dropping request");
        }
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.cmd_tx.send(CaptureCommand::Stop);
            let _ = self.cmd_tx.send(CaptureCommand::Shutdown);
        }
    }
}

struct CaptureActor {
    producer: Box<dyn FrameProducer>,
    hooks: CaptureHooks,
    config: CaptureConfig,
    /// Used to mint producer sinks
    cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
    capture_state: CaptureState,
    /// Incremented on every start; producer signals from older sessions are dropped
    generation: u64,
    deadline: Option<Instant>,
    state: Arc<AtomicU8>,
    events_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<CaptureCommand>) {
        debug!("Capture controller started");

        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(CaptureCommand::Start) => self.handle_start(),
                        Some(CaptureCommand::Stop) => self.handle_stop(),
                        Some(CaptureCommand::Ready { generation }) => self.handle_ready(generation),
                        Some(CaptureCommand::DidEnd { generation }) => self.handle_did_end(generation),
                        Some(CaptureCommand::Synchronize(done)) => {
                            let _ = done.send(());
                        }
                        // The actor holds a sender itself, so the channel never reports closed
                        Some(CaptureCommand::Shutdown) | None => break,
                    }
                }

                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.deadline = None;
                    self.handle_ready_timeout();
                }
            }
        }

        debug!("Capture controller stopped");
    }

    fn handle_start(&mut self) {
        if self.capture_state != CaptureState::Stopped {
            debug!("Capture already {:?}", self.capture_state);
            return;
        }

        let Some(channel) = CaptureChannel::resolve(&self.config) else {
            warn!("No application group configured, screen capture cannot start");
            return;
        };

        self.generation += 1;
        let sink = CapturerEventSink::new(self.cmd_tx.clone(), self.generation);

        info!(
            "Starting screen capture via {:?} (session {})",
            channel.socket_path, self.generation
        );
        self.set_state(CaptureState::Starting);
        self.deadline = self
            .config
            .ready_timeout()
            .map(|timeout: Duration| Instant::now() + timeout);

        if let Err(e) = self.producer.start(&channel, sink) {
            error!("Failed to start frame producer: {}", e);
            self.deadline = None;
            self.set_state(CaptureState::Stopped);
        }
    }

    fn handle_stop(&mut self) {
        if self.capture_state == CaptureState::Stopped {
            debug!("Capture already stopped");
            return;
        }

        info!("Stopping screen capture (session {})", self.generation);
        self.deadline = None;
        self.set_state(CaptureState::Stopped);
        self.producer.stop();
        let _ = self.events_tx.send(CaptureEvent::Stopped);
    }

    fn handle_ready(&mut self, generation: u64) {
        if generation != self.generation {
            debug!("Discarding ready signal from stale capture session {}", generation);
            return;
        }

        if self.capture_state != CaptureState::Starting {
            debug!("Ignoring ready signal while {:?}", self.capture_state);
            return;
        }

        info!("Screen capture ready (session {})", generation);
        self.deadline = None;
        self.set_state(CaptureState::Capturing);
        if let Some(hook) = &self.hooks.on_capture_ready {
            hook();
        }
        let _ = self.events_tx.send(CaptureEvent::Ready);
    }

    fn handle_did_end(&mut self, generation: u64) {
        if generation != self.generation || self.capture_state == CaptureState::Stopped {
            debug!("Discarding end signal from capture session {}", generation);
            return;
        }

        warn!("Frame producer ended irrecoverably (session {})", generation);
        self.deadline = None;
        self.set_state(CaptureState::Stopped);
        self.producer.stop();
        self.notify_ended();
    }

    fn handle_ready_timeout(&mut self) {
        if self.capture_state != CaptureState::Starting {
            return;
        }

        warn!(
            "Frame producer did not become ready in time (session {}), stopping it",
            self.generation
        );
        self.set_state(CaptureState::Stopped);
        self.producer.stop();
        self.notify_ended();
    }

    fn notify_ended(&self) {
        if let Some(hook) = &self.hooks.on_capture_ended {
            hook();
        }
        let _ = self.events_tx.send(CaptureEvent::Ended);
    }

    fn set_state(&mut self, state: CaptureState) {
        debug!("Capture: {:?} -> {:?}", self.capture_state, state);
        self.capture_state = state;
        self.state.store(state as u8, Ordering::Release);
    }
}
