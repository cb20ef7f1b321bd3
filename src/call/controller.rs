//! Call session controller
//!
//! A single actor task owns the [`CallSession`]. Application requests and
//! authority delegate events share one unbounded queue, so they are applied
//! in arrival order and never interleave:
//!
//! ```text
//! Idle --start_call--> Starting
//! Starting --accepted / perform-start / perform-answer--> Active   [started]
//! Starting --failed / ended / end_call / start timeout--> Idle     [failed]
//! Active --end_call--> Ending
//! Active --ended by authority--> Ending --> Idle                   [ended]
//! Ending --ended / end timeout--> Idle                             [ended]
//! Active --mute / hold--> Active                                   [muted / held]
//! ```
//!
//! Events carrying a handle other than the current one are discarded.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::authority::{AuthorityEvent, AuthorityEventSink, CallAuthority, StartCallRequest};
use super::hooks::CallHooks;
use super::{CallAction, CallHandle, CallInfo, CallSession, CallState};
use crate::config::CallConfig;
use crate::error::BridgeError;

const START_TIMEOUT_REASON: &str = "timed out waiting for the call to start";
const ENDED_BEFORE_CONNECT_REASON: &str = "call ended before it was connected";
const PROVIDER_RESET_REASON: &str = "call provider was reset";

/// Messages processed by the controller task
pub(crate) enum CallCommand {
    Start { display_name: String, is_video: bool },
    End,
    Authority(AuthorityEvent),
    Synchronize(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the call session actor.
///
/// Every method may be called from any thread. `start_call` and `end_call`
/// return immediately; their effects are applied in order by the actor.
pub struct CallSessionController {
    cmd_tx: mpsc::UnboundedSender<CallCommand>,
    state: Arc<AtomicU8>,
    info_rx: watch::Receiver<Option<CallInfo>>,
    actions_tx: broadcast::Sender<CallAction>,
    task: Option<JoinHandle<()>>,
}

impl CallSessionController {
    /// Spawn the controller and register it as the authority's delegate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(authority: Arc<dyn CallAuthority>, hooks: CallHooks, config: &CallConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (actions_tx, _) = broadcast::channel(config.action_channel_capacity.max(1));
        let (info_tx, info_rx) = watch::channel(None);
        let state = Arc::new(AtomicU8::new(CallState::Idle as u8));

        authority.register_delegate(AuthorityEventSink::new(cmd_tx.clone()));

        let actor = CallActor {
            authority,
            hooks,
            start_timeout: config.start_timeout(),
            end_timeout: config.end_timeout(),
            session: None,
            deadline: None,
            state: state.clone(),
            info_tx,
            actions_tx: actions_tx.clone(),
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        Self {
            cmd_tx,
            state,
            info_rx,
            actions_tx,
            task: Some(task),
        }
    }

    /// Start an outgoing call. Ignored (with a warning) while a call exists.
    ///
    /// The state reads Starting as soon as this returns; the actor publishes
    /// the outcome once it has processed the request.
    pub fn start_call(&self, display_name: impl Into<String>, is_video: bool) {
        let claimed = self
            .state
            .compare_exchange(
                CallState::Idle as u8,
                CallState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        let sent = self.send(CallCommand::Start {
            display_name: display_name.into(),
            is_video,
        });
        if claimed && !sent {
            self.state.store(CallState::Idle as u8, Ordering::Release);
        }
    }

    /// End the current call, if any
    pub fn end_call(&self) {
        let _ = self.send(CallCommand::End);
    }

    /// True while a call is Starting, Active or Ending
    pub fn has_active_call(&self) -> bool {
        self.state().is_call_present()
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the current call
    pub fn current_call(&self) -> Option<CallInfo> {
        self.info_rx.borrow().clone()
    }

    /// Receive every confirmed call action
    pub fn subscribe(&self) -> broadcast::Receiver<CallAction> {
        self.actions_tx.subscribe()
    }

    /// Wait until everything queued before this call has been applied
    pub async fn synchronize(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::Synchronize(tx))
            .map_err(|_| BridgeError::ControllerClosed("call"))?;
        rx.await.map_err(|_| BridgeError::ControllerClosed("call"))
    }

    /// Stop the actor and wait for it to exit. The call, if any, is left as is.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(CallCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Call controller task failed: {}", e);
            }
        }
    }

    fn send(&self, cmd: CallCommand) -> bool {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("Call controller has shut down, dropping request");
            return false;
        }
        true
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.cmd_tx.send(CallCommand::Shutdown);
        }
    }
}

struct CallActor {
    authority: Arc<dyn CallAuthority>,
    hooks: CallHooks,
    start_timeout: Option<Duration>,
    end_timeout: Option<Duration>,
    session: Option<CallSession>,
    /// Supervising deadline for the current Starting/Ending phase
    deadline: Option<Instant>,
    state: Arc<AtomicU8>,
    info_tx: watch::Sender<Option<CallInfo>>,
    actions_tx: broadcast::Sender<CallAction>,
}

impl CallActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<CallCommand>) {
        debug!("Call controller started");

        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(CallCommand::Start { display_name, is_video }) => {
                            self.handle_start(display_name, is_video);
                        }
                        Some(CallCommand::End) => self.handle_end(),
                        Some(CallCommand::Authority(event)) => self.handle_authority_event(event),
                        Some(CallCommand::Synchronize(done)) => {
                            let _ = done.send(());
                        }
                        Some(CallCommand::Shutdown) | None => break,
                    }
                }

                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.deadline = None;
                    self.handle_timeout();
                }
            }
        }

        debug!("Call controller stopped");
    }

    fn handle_start(&mut self, display_name: String, is_video: bool) {
        if let Some(session) = &self.session {
            warn!(
                "Ignoring start for '{}': call {} is already {:?}",
                display_name, session.handle, session.state
            );
            return;
        }

        let session = CallSession::new(display_name, is_video);
        let request = StartCallRequest {
            handle: session.handle,
            display_name: session.display_name.clone(),
            is_video,
        };

        info!(
            "Starting call {} for '{}' (video: {})",
            request.handle, request.display_name, is_video
        );

        self.session = Some(session);
        self.arm(self.start_timeout);
        self.publish();

        if let Err(e) = self.authority.request_start_call(&request) {
            warn!("Authority rejected start of call {}: {}", request.handle, e);
            self.clear_session();
            self.notify(CallAction::Failed(e.reason()));
        }
    }

    fn handle_end(&mut self) {
        let Some(session) = self.session.as_ref() else {
            debug!("End requested with no call in progress");
            return;
        };

        if session.state == CallState::Ending {
            debug!("Call {} is already ending", session.handle);
            return;
        }

        let handle = session.handle;
        if session.state == CallState::Starting {
            info!("Withdrawing call {} before it was connected", handle);
            self.abandon_start(handle, ENDED_BEFORE_CONNECT_REASON);
            return;
        }

        info!("Ending call {}", handle);
        self.set_state(CallState::Ending);
        self.arm(self.end_timeout);

        if let Err(e) = self.authority.request_end_call(handle) {
            warn!(
                "Authority refused to end call {}: {}; tearing down locally",
                handle, e
            );
            self.finish_call();
        }
    }

    fn handle_authority_event(&mut self, event: AuthorityEvent) {
        let Some(handle) = event.handle() else {
            self.handle_reset();
            return;
        };

        let Some(session) = self.session.as_ref() else {
            debug!("Discarding {}: no call in progress", event);
            return;
        };

        if session.handle != handle {
            debug!("Discarding stale {} (current call {})", event, session.handle);
            return;
        }

        let state = session.state;
        match (state, event) {
            (
                CallState::Starting,
                AuthorityEvent::CallAccepted { .. }
                | AuthorityEvent::PerformStartCall { .. }
                | AuthorityEvent::PerformAnswerCall { .. },
            ) => {
                if let Some(session) = self.session.as_mut() {
                    session.connected_at = Some(chrono::Utc::now());
                }
                info!("Call {} is active", handle);
                self.disarm();
                self.set_state(CallState::Active);
                self.notify(CallAction::Started);
            }

            (CallState::Starting, AuthorityEvent::CallFailed { reason, .. }) => {
                warn!("Call {} failed to start: {}", handle, reason);
                self.clear_session();
                self.notify(CallAction::Failed(reason));
            }

            (CallState::Starting, AuthorityEvent::CallEnded { .. }) => {
                warn!("Call {} ended before it was connected", handle);
                self.clear_session();
                self.notify(CallAction::Failed(ENDED_BEFORE_CONNECT_REASON.to_string()));
            }

            (CallState::Active, AuthorityEvent::CallEnded { .. }) => {
                info!("Call {} ended by the authority", handle);
                self.set_state(CallState::Ending);
                self.finish_call();
            }

            (CallState::Ending, AuthorityEvent::CallEnded { .. }) => {
                self.finish_call();
            }

            (CallState::Ending, AuthorityEvent::CallFailed { reason, .. }) => {
                warn!(
                    "End of call {} failed ({}); tearing down locally",
                    handle, reason
                );
                self.finish_call();
            }

            (CallState::Active, AuthorityEvent::MuteChanged { muted, .. }) => {
                debug!("Call {} muted: {}", handle, muted);
                self.notify(CallAction::Muted(muted));
            }

            (CallState::Active, AuthorityEvent::HoldChanged { on_hold, .. }) => {
                debug!("Call {} on hold: {}", handle, on_hold);
                self.notify(CallAction::Held(on_hold));
            }

            (state, event) => {
                debug!("Ignoring {} while call {} is {:?}", event, handle, state);
            }
        }
    }

    fn handle_reset(&mut self) {
        let Some(session) = self.session.as_ref() else {
            debug!("Provider reset with no call in progress");
            return;
        };

        let (handle, state) = (session.handle, session.state);
        warn!("Provider reset; dropping call {} ({:?})", handle, state);
        self.clear_session();

        match state {
            CallState::Starting => {
                self.notify(CallAction::Failed(PROVIDER_RESET_REASON.to_string()))
            }
            _ => self.notify(CallAction::Ended),
        }
    }

    fn handle_timeout(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let handle = session.handle;
        match session.state {
            CallState::Starting => {
                warn!("Call {} was not confirmed in time, abandoning it", handle);
                self.abandon_start(handle, START_TIMEOUT_REASON);
            }
            CallState::Ending => {
                warn!("End of call {} was not confirmed in time, tearing down locally", handle);
                self.finish_call();
            }
            _ => {}
        }
    }

    /// Starting -> Idle without ever reporting the call as started
    fn abandon_start(&mut self, handle: CallHandle, reason: &str) {
        self.clear_session();
        if let Err(e) = self.authority.request_end_call(handle) {
            debug!("Could not withdraw call {}: {}", handle, e);
        }
        self.notify(CallAction::Failed(reason.to_string()));
    }

    /// Ending -> Idle
    fn finish_call(&mut self) {
        if let Some(session) = &self.session {
            match session.connected_at {
                Some(connected_at) => {
                    let duration = chrono::Utc::now() - connected_at;
                    info!(
                        "Call {} ended after {}s",
                        session.handle,
                        duration.num_seconds()
                    );
                }
                None => info!("Call {} ended", session.handle),
            }
        }
        self.clear_session();
        self.notify(CallAction::Ended);
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.disarm();
        self.publish();
    }

    fn set_state(&mut self, state: CallState) {
        if let Some(session) = self.session.as_mut() {
            debug!("Call {}: {:?} -> {:?}", session.handle, session.state, state);
            session.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        let state = self
            .session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(CallState::Idle);
        self.state.store(state as u8, Ordering::Release);
        self.info_tx
            .send_replace(self.session.as_ref().map(CallSession::info));
    }

    fn arm(&mut self, timeout: Option<Duration>) {
        self.deadline = timeout.map(|timeout| Instant::now() + timeout);
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }

    fn notify(&self, action: CallAction) {
        self.hooks.dispatch(&action);
        // No receivers is fine
        let _ = self.actions_tx.send(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthorityError;
    use std::sync::{Mutex, OnceLock};

    #[derive(Default)]
    struct FakeAuthority {
        sink: OnceLock<AuthorityEventSink>,
        starts: Mutex<Vec<StartCallRequest>>,
        ends: Mutex<Vec<CallHandle>>,
        reject_start: Mutex<Option<AuthorityError>>,
    }

    impl FakeAuthority {
        fn sink(&self) -> &AuthorityEventSink {
            self.sink.get().expect("delegate registered")
        }

        fn last_handle(&self) -> CallHandle {
            self.starts.lock().unwrap().last().expect("a start request").handle
        }
    }

    impl CallAuthority for FakeAuthority {
        fn register_delegate(&self, sink: AuthorityEventSink) {
            let _ = self.sink.set(sink);
        }

        fn request_start_call(&self, request: &StartCallRequest) -> Result<(), AuthorityError> {
            if let Some(err) = self.reject_start.lock().unwrap().clone() {
                return Err(err);
            }
            self.starts.lock().unwrap().push(request.clone());
            Ok(())
        }

        fn request_end_call(&self, handle: CallHandle) -> Result<(), AuthorityError> {
            self.ends.lock().unwrap().push(handle);
            Ok(())
        }
    }

    fn recorder() -> (CallHooks, Arc<Mutex<Vec<CallAction>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c, d, e) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
        let hooks = CallHooks::new()
            .on_call_started(move || a.lock().unwrap().push(CallAction::Started))
            .on_call_ended(move || b.lock().unwrap().push(CallAction::Ended))
            .on_call_failed(move |reason| c.lock().unwrap().push(CallAction::Failed(reason)))
            .on_call_muted(move |flag| d.lock().unwrap().push(CallAction::Muted(flag)))
            .on_call_held(move |flag| e.lock().unwrap().push(CallAction::Held(flag)));
        (hooks, log)
    }

    fn controller(authority: &Arc<FakeAuthority>) -> (CallSessionController, Arc<Mutex<Vec<CallAction>>>) {
        let (hooks, log) = recorder();
        let controller = CallSessionController::new(authority.clone(), hooks, &CallConfig::default());
        (controller, log)
    }

    #[tokio::test]
    async fn test_start_transitions_to_starting_without_notifying() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        assert!(!controller.has_active_call());
        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Starting);
        assert!(controller.has_active_call());
        assert!(log.lock().unwrap().is_empty());

        let info = controller.current_call().unwrap();
        assert_eq!(info.display_name, "Alice");
        assert!(info.is_video);
        assert_eq!(info.handle, authority.last_handle());
    }

    #[tokio::test]
    async fn test_duplicate_confirmations_fire_started_once() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", false);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();

        authority.sink().perform_start_call(handle);
        authority.sink().call_accepted(handle);
        authority.sink().perform_answer_call(handle);
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Active);
        assert_eq!(*log.lock().unwrap(), vec![CallAction::Started]);
        assert!(controller.current_call().unwrap().connected_at.is_some());
    }

    #[tokio::test]
    async fn test_synchronous_rejection_returns_to_idle() {
        let authority = Arc::new(FakeAuthority::default());
        *authority.reject_start.lock().unwrap() =
            Some(AuthorityError::Rejected("resource busy".to_string()));
        let (controller, log) = controller(&authority);

        controller.start_call("Bob", false);
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert!(controller.current_call().is_none());
        assert_eq!(
            *log.lock().unwrap(),
            vec![CallAction::Failed("resource busy".to_string())]
        );
    }

    #[tokio::test]
    async fn test_end_while_idle_is_noop() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.end_call();
        controller.synchronize().await.unwrap();

        assert!(authority.ends.lock().unwrap().is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_end_request_is_not_forwarded() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();
        authority.sink().call_accepted(handle);

        controller.end_call();
        controller.end_call();
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Ending);
        assert_eq!(*authority.ends.lock().unwrap(), vec![handle]);

        authority.sink().call_ended(handle);
        authority.sink().call_ended(handle);
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(*log.lock().unwrap(), vec![CallAction::Started, CallAction::Ended]);
    }

    #[tokio::test]
    async fn test_authority_initiated_end() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();
        authority.sink().call_accepted(handle);
        authority.sink().call_ended(handle);
        controller.synchronize().await.unwrap();

        assert!(!controller.has_active_call());
        assert!(authority.ends.lock().unwrap().is_empty());
        assert_eq!(*log.lock().unwrap(), vec![CallAction::Started, CallAction::Ended]);
    }

    #[tokio::test]
    async fn test_end_before_connect_reports_failure() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        authority.sink().call_ended(authority.last_handle());
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(
            *log.lock().unwrap(),
            vec![CallAction::Failed(ENDED_BEFORE_CONNECT_REASON.to_string())]
        );
    }

    #[tokio::test]
    async fn test_end_while_starting_withdraws_without_ended() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();

        controller.end_call();
        controller.synchronize().await.unwrap();
        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(*authority.ends.lock().unwrap(), vec![handle]);

        // The authority's confirmation of the withdrawal is stale by now
        authority.sink().call_ended(handle);
        authority.sink().provider_did_reset();
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(
            *log.lock().unwrap(),
            vec![CallAction::Failed(ENDED_BEFORE_CONNECT_REASON.to_string())]
        );
    }

    #[tokio::test]
    async fn test_start_is_visible_before_actor_runs() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, _log) = controller(&authority);

        controller.start_call("Alice", true);
        assert!(controller.has_active_call());
        assert_eq!(controller.state(), CallState::Starting);

        // A rejected start clears it again
        controller.synchronize().await.unwrap();
        authority.sink().call_failed(authority.last_handle(), "resource busy");
        controller.synchronize().await.unwrap();
        assert!(!controller.has_active_call());
    }

    #[tokio::test]
    async fn test_start_after_shutdown_stays_idle() {
        let authority = Arc::new(FakeAuthority::default());
        let (hooks, _log) = recorder();
        let mut controller =
            CallSessionController::new(authority.clone(), hooks, &CallConfig::default());
        let _ = controller.cmd_tx.send(CallCommand::Shutdown);
        if let Some(task) = controller.task.take() {
            task.await.unwrap();
        }

        controller.start_call("Alice", true);
        assert!(!controller.has_active_call());
    }

    #[tokio::test]
    async fn test_mute_and_hold_only_while_active() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();

        // Not yet confirmed
        authority.sink().mute_changed(handle, true);
        authority.sink().call_accepted(handle);
        authority.sink().mute_changed(handle, true);
        authority.sink().hold_changed(handle, true);
        authority.sink().hold_changed(handle, false);
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Active);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                CallAction::Started,
                CallAction::Muted(true),
                CallAction::Held(true),
                CallAction::Held(false),
            ]
        );
    }

    #[tokio::test]
    async fn test_provider_reset_clears_call() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        authority.sink().call_accepted(authority.last_handle());
        authority.sink().provider_did_reset();
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(*log.lock().unwrap(), vec![CallAction::Started, CallAction::Ended]);

        // Reset while pending fails the start instead
        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        authority.sink().provider_did_reset();
        controller.synchronize().await.unwrap();
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&CallAction::Failed(PROVIDER_RESET_REASON.to_string()))
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_actions() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, _log) = controller(&authority);
        let mut actions = controller.subscribe();

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        authority.sink().call_accepted(authority.last_handle());
        authority.sink().mute_changed(authority.last_handle(), false);
        controller.synchronize().await.unwrap();

        assert_eq!(actions.recv().await.unwrap(), CallAction::Started);
        assert_eq!(actions.recv().await.unwrap(), CallAction::Muted(false));
    }

    #[tokio::test]
    async fn test_hook_may_reenter_controller() {
        let authority = Arc::new(FakeAuthority::default());
        let controller = Arc::new(Mutex::new(None::<mpsc::UnboundedSender<CallCommand>>));
        let reentry = controller.clone();
        let hooks = CallHooks::new().on_call_failed(move |_| {
            if let Some(tx) = reentry.lock().unwrap().as_ref() {
                let _ = tx.send(CallCommand::Start {
                    display_name: "retry".to_string(),
                    is_video: false,
                });
            }
        });
        let session = CallSessionController::new(authority.clone(), hooks, &CallConfig::default());
        *controller.lock().unwrap() = Some(session.cmd_tx.clone());

        session.start_call("first", false);
        session.synchronize().await.unwrap();
        authority.sink().call_failed(authority.last_handle(), "resource busy");
        session.synchronize().await.unwrap();
        session.synchronize().await.unwrap();

        assert_eq!(session.state(), CallState::Starting);
        assert_eq!(authority.starts.lock().unwrap().len(), 2);
        assert_eq!(session.current_call().unwrap().display_name, "retry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_abandons_call() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        let handle = authority.last_handle();

        tokio::time::sleep(Duration::from_millis(10_001)).await;
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(*authority.ends.lock().unwrap(), vec![handle]);
        assert_eq!(
            *log.lock().unwrap(),
            vec![CallAction::Failed(START_TIMEOUT_REASON.to_string())]
        );

        // A late confirmation is stale now
        authority.sink().call_accepted(handle);
        controller.synchronize().await.unwrap();
        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_timeout_forces_teardown() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, log) = controller(&authority);

        controller.start_call("Alice", true);
        controller.synchronize().await.unwrap();
        authority.sink().call_accepted(authority.last_handle());
        controller.end_call();
        controller.synchronize().await.unwrap();
        assert_eq!(controller.state(), CallState::Ending);

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        controller.synchronize().await.unwrap();

        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(*log.lock().unwrap(), vec![CallAction::Started, CallAction::Ended]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sink() {
        let authority = Arc::new(FakeAuthority::default());
        let (controller, _log) = controller(&authority);

        controller.shutdown().await;
        assert!(!authority.sink().provider_did_reset());
    }
}
