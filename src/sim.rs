//! Simulated collaborators
//!
//! Stand-ins for the platform call authority and the recording extension.
//! Both answer from their own OS threads, the way the real services call
//! their delegates, which makes them useful for the demo binary and for
//! exercising the controllers end to end.

use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::call::{AuthorityEventSink, CallAuthority, CallHandle, StartCallRequest};
use crate::capture::{CapturerEventSink, FrameProducer};
use crate::error::{AuthorityError, CaptureError};
use crate::ipc::CaptureChannel;

/// Call authority that confirms every request after a delay
pub struct AutoConfirmAuthority {
    delegate: OnceLock<AuthorityEventSink>,
    confirm_delay: Duration,
    /// When set, start requests are answered with a failure carrying this reason
    reject_reason: Mutex<Option<String>>,
    current: Mutex<Option<CallHandle>>,
}

impl AutoConfirmAuthority {
    pub fn new(confirm_delay: Duration) -> Self {
        Self {
            delegate: OnceLock::new(),
            confirm_delay,
            reject_reason: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Answer subsequent start requests with a failure
    pub fn reject_starts_with(&self, reason: impl Into<String>) {
        *lock(&self.reject_reason) = Some(reason.into());
    }

    /// Answer subsequent start requests with a confirmation
    pub fn accept_starts(&self) {
        *lock(&self.reject_reason) = None;
    }

    /// Handle of the last call the authority registered
    pub fn current_call(&self) -> Option<CallHandle> {
        *lock(&self.current)
    }

    /// The user toggled mute in the system call UI
    pub fn simulate_mute(&self, muted: bool) {
        if let (Some(sink), Some(handle)) = (self.delegate.get(), self.current_call()) {
            sink.mute_changed(handle, muted);
        }
    }

    /// The user toggled hold in the system call UI
    pub fn simulate_hold(&self, on_hold: bool) {
        if let (Some(sink), Some(handle)) = (self.delegate.get(), self.current_call()) {
            sink.hold_changed(handle, on_hold);
        }
    }

    /// The user hung up from the system call UI
    pub fn simulate_remote_end(&self) {
        let handle = lock(&self.current).take();
        if let (Some(sink), Some(handle)) = (self.delegate.get(), handle) {
            sink.call_ended(handle);
        }
    }

    /// The provider dropped every call
    pub fn simulate_reset(&self) {
        lock(&self.current).take();
        if let Some(sink) = self.delegate.get() {
            sink.provider_did_reset();
        }
    }

    fn delegate(&self) -> Result<AuthorityEventSink, AuthorityError> {
        self.delegate
            .get()
            .cloned()
            .ok_or_else(|| AuthorityError::Unavailable("no delegate registered".to_string()))
    }
}

impl CallAuthority for AutoConfirmAuthority {
    fn register_delegate(&self, sink: AuthorityEventSink) {
        if self.delegate.set(sink).is_err() {
            warn!("Simulated authority already has a delegate, ignoring");
        }
    }

    fn request_start_call(&self, request: &StartCallRequest) -> Result<(), AuthorityError> {
        let sink = self.delegate()?;
        let handle = request.handle;
        let delay = self.confirm_delay;
        let reject = lock(&self.reject_reason).clone();

        info!(
            "Simulated authority registering call {} for '{}'",
            handle, request.display_name
        );
        if reject.is_none() {
            *lock(&self.current) = Some(handle);
        }

        thread::spawn(move || {
            thread::sleep(delay);
            match reject {
                Some(reason) => {
                    debug!("Simulated authority rejecting call {}", handle);
                    sink.call_failed(handle, reason);
                }
                None => {
                    sink.perform_start_call(handle);
                    // The platform also reports the connection; the controller drops the duplicate
                    sink.call_accepted(handle);
                }
            }
        });

        Ok(())
    }

    fn request_end_call(&self, handle: CallHandle) -> Result<(), AuthorityError> {
        let sink = self.delegate()?;
        let delay = self.confirm_delay;

        {
            let mut current = lock(&self.current);
            if *current == Some(handle) {
                *current = None;
            }
        }

        thread::spawn(move || {
            thread::sleep(delay);
            sink.call_ended(handle);
        });

        Ok(())
    }
}

/// Frame producer that becomes ready after a delay and never delivers frames
pub struct SimulatedCapturer {
    ready_delay: Duration,
    active: Arc<Mutex<Option<CapturerEventSink>>>,
}

impl SimulatedCapturer {
    pub fn new(ready_delay: Duration) -> Self {
        Self {
            ready_delay,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Handle for injecting producer failures after the capturer has been
    /// moved into a controller
    pub fn failure_trigger(&self) -> CapturerFailureTrigger {
        CapturerFailureTrigger {
            active: self.active.clone(),
        }
    }
}

impl FrameProducer for SimulatedCapturer {
    fn start(&mut self, channel: &CaptureChannel, events: CapturerEventSink) -> Result<(), CaptureError> {
        info!(
            "Simulated capturer connecting to {:?} (group {})",
            channel.socket_path, channel.app_group_id
        );
        *lock(&self.active) = Some(events.clone());

        let delay = self.ready_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            events.capturer_ready();
        });

        Ok(())
    }

    fn stop(&mut self) {
        if lock(&self.active).take().is_some() {
            info!("Simulated capturer stopped");
        }
    }
}

/// Makes a running [`SimulatedCapturer`] report an irrecoverable end
#[derive(Clone)]
pub struct CapturerFailureTrigger {
    active: Arc<Mutex<Option<CapturerEventSink>>>,
}

impl CapturerFailureTrigger {
    /// Returns false when the capturer is not running
    pub fn fail(&self) -> bool {
        match lock(&self.active).take() {
            Some(sink) => sink.capturer_did_end(),
            None => false,
        }
    }
}

/// Lock ignoring poisoning; the guarded values stay consistent across panics
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
