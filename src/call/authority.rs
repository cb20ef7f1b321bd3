//! Contract with the platform call authority (the system call UI service)

use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use super::controller::CallCommand;
use super::CallHandle;
use crate::error::AuthorityError;

/// Outgoing call registration sent to the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCallRequest {
    pub handle: CallHandle,
    pub display_name: String,
    pub is_video: bool,
}

/// The platform service that owns the system call UI.
///
/// Requests only submit a transaction; the outcome comes back later as
/// [`AuthorityEvent`]s through the sink handed to `register_delegate`,
/// on whatever thread the authority chooses.
pub trait CallAuthority: Send + Sync {
    /// Called once by the controller when it is constructed
    fn register_delegate(&self, sink: AuthorityEventSink);

    /// Ask the authority to register a new outgoing call
    fn request_start_call(&self, request: &StartCallRequest) -> Result<(), AuthorityError>;

    /// Ask the authority to end a registered call
    fn request_end_call(&self, handle: CallHandle) -> Result<(), AuthorityError>;
}

/// Delegate events emitted by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityEvent {
    /// The provider dropped all calls; no confirmation follows
    ProviderReset,
    /// The call was accepted and is now connected
    CallAccepted { handle: CallHandle },
    /// The authority performed the start action for our outgoing call
    PerformStartCall { handle: CallHandle },
    /// The authority performed an answer action
    PerformAnswerCall { handle: CallHandle },
    /// The call ended, either confirming our request or initiated by the system
    CallEnded { handle: CallHandle },
    /// A transaction for the call failed
    CallFailed { handle: CallHandle, reason: String },
    MuteChanged { handle: CallHandle, muted: bool },
    HoldChanged { handle: CallHandle, on_hold: bool },
}

impl AuthorityEvent {
    /// Call the event refers to, if any
    pub fn handle(&self) -> Option<CallHandle> {
        match self {
            AuthorityEvent::ProviderReset => None,
            AuthorityEvent::CallAccepted { handle }
            | AuthorityEvent::PerformStartCall { handle }
            | AuthorityEvent::PerformAnswerCall { handle }
            | AuthorityEvent::CallEnded { handle }
            | AuthorityEvent::CallFailed { handle, .. }
            | AuthorityEvent::MuteChanged { handle, .. }
            | AuthorityEvent::HoldChanged { handle, .. } => Some(*handle),
        }
    }
}

impl fmt::Display for AuthorityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityEvent::ProviderReset => write!(f, "ProviderReset"),
            AuthorityEvent::CallAccepted { handle } => write!(f, "CallAccepted({})", handle),
            AuthorityEvent::PerformStartCall { handle } => {
                write!(f, "PerformStartCall({})", handle)
            }
            AuthorityEvent::PerformAnswerCall { handle } => {
                write!(f, "PerformAnswerCall({})", handle)
            }
            AuthorityEvent::CallEnded { handle } => write!(f, "CallEnded({})", handle),
            AuthorityEvent::CallFailed { handle, reason } => {
                write!(f, "CallFailed({}, {:?})", handle, reason)
            }
            AuthorityEvent::MuteChanged { handle, muted } => {
                write!(f, "MuteChanged({}, {})", handle, muted)
            }
            AuthorityEvent::HoldChanged { handle, on_hold } => {
                write!(f, "HoldChanged({}, {})", handle, on_hold)
            }
        }
    }
}

/// Delegate handle given to the authority.
///
/// Cheap to clone and usable from any thread, runtime or not: every method
/// only enqueues onto the controller's serialized event queue.
#[derive(Clone)]
pub struct AuthorityEventSink {
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl AuthorityEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CallCommand>) -> Self {
        Self { tx }
    }

    /// Deliver an event. Returns false once the controller has shut down.
    pub fn send(&self, event: AuthorityEvent) -> bool {
        match self.tx.send(CallCommand::Authority(event)) {
            Ok(()) => true,
            Err(e) => {
                if let CallCommand::Authority(event) = e.0 {
                    debug!("Call controller gone, dropping {}", event);
                }
                false
            }
        }
    }

    pub fn provider_did_reset(&self) -> bool {
        self.send(AuthorityEvent::ProviderReset)
    }

    pub fn call_accepted(&self, handle: CallHandle) -> bool {
        self.send(AuthorityEvent::CallAccepted { handle })
    }

    pub fn perform_start_call(&self, handle: CallHandle) -> bool {
        self.send(AuthorityEvent::PerformStartCall { handle })
    }

    pub fn perform_answer_call(&self, handle: CallHandle) -> bool {
        self.send(AuthorityEvent::PerformAnswerCall { handle })
    }

    pub fn call_ended(&self, handle: CallHandle) -> bool {
        self.send(AuthorityEvent::CallEnded { handle })
    }

    pub fn call_failed(&self, handle: CallHandle, reason: impl Into<String>) -> bool {
        self.send(AuthorityEvent::CallFailed {
            handle,
            reason: reason.into(),
        })
    }

    pub fn mute_changed(&self, handle: CallHandle, muted: bool) -> bool {
        self.send(AuthorityEvent::MuteChanged { handle, muted })
    }

    pub fn hold_changed(&self, handle: CallHandle, on_hold: bool) -> bool {
        self.send(AuthorityEvent::HoldChanged { handle, on_hold })
    }
}

impl fmt::Debug for AuthorityEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityEventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
