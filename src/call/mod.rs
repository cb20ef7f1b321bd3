//! Call session lifecycle
//!
//! Reconciles the platform call authority's asynchronous delegate events
//! with application start/end requests. All state lives in a single actor
//! task; authority callbacks only enqueue events, whatever thread they
//! arrive on.

mod authority;
mod controller;
mod hooks;

pub use authority::{AuthorityEvent, AuthorityEventSink, CallAuthority, StartCallRequest};
pub use controller::CallSessionController;
pub use hooks::CallHooks;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier correlating our session with the authority's record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CallHandle(Uuid);

impl CallHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CallHandle {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum CallState {
    #[default]
    Idle = 0,
    /// Start requested, waiting for the authority to confirm
    Starting = 1,
    Active = 2,
    /// End requested or reported, waiting for teardown
    Ending = 3,
}

impl CallState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CallState::Starting,
            2 => CallState::Active,
            3 => CallState::Ending,
            _ => CallState::Idle,
        }
    }

    /// Whether a call exists in this state. Pending starts and ends count,
    /// so a second start cannot race an unconfirmed one.
    pub fn is_call_present(self) -> bool {
        self != CallState::Idle
    }
}

/// The single call owned by the controller
#[derive(Debug, Clone)]
pub(crate) struct CallSession {
    pub handle: CallHandle,
    pub display_name: String,
    pub is_video: bool,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(display_name: String, is_video: bool) -> Self {
        Self {
            handle: CallHandle::new(),
            display_name,
            is_video,
            state: CallState::Starting,
            created_at: Utc::now(),
            connected_at: None,
        }
    }

    pub fn info(&self) -> CallInfo {
        CallInfo {
            handle: self.handle,
            display_name: self.display_name.clone(),
            is_video: self.is_video,
            state: self.state,
            created_at: self.created_at,
            connected_at: self.connected_at,
        }
    }
}

/// Read-only snapshot of the current call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallInfo {
    pub handle: CallHandle,
    pub display_name: String,
    pub is_video: bool,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// A confirmed call lifecycle notification, as delivered to hooks and
/// to `subscribe()` receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    Started,
    Ended,
    Failed(String),
    Muted(bool),
    Held(bool),
}

impl CallAction {
    /// Event payload keyed by action name, e.g. `{"muted":true}` or `{"started":null}`
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            CallAction::Started => serde_json::json!({ "started": null }),
            CallAction::Ended => serde_json::json!({ "ended": null }),
            CallAction::Failed(reason) => serde_json::json!({ "failed": reason }),
            CallAction::Muted(muted) => serde_json::json!({ "muted": muted }),
            CallAction::Held(held) => serde_json::json!({ "held": held }),
        }
    }
}
