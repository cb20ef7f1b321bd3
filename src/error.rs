//! Error types shared by the call and capture controllers

use thiserror::Error;

/// Errors reported synchronously by a call authority when a transaction
/// request cannot even be submitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// The authority declined the request (resource contention, permission denial)
    #[error("{0}")]
    Rejected(String),

    /// The authority is not reachable (not registered, torn down)
    #[error("call authority unavailable: {0}")]
    Unavailable(String),
}

impl AuthorityError {
    /// Human-readable reason suitable for `on_call_failed`
    pub fn reason(&self) -> String {
        match self {
            AuthorityError::Rejected(reason) => reason.clone(),
            AuthorityError::Unavailable(_) => self.to_string(),
        }
    }
}

/// Errors reported by a frame producer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to start frame producer: {0}")]
    StartFailed(String),

    #[error("shared capture channel unavailable: {0}")]
    ChannelUnavailable(String),
}

/// Errors surfaced by the controller handles themselves
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The controller task has exited; commands can no longer be delivered
    #[error("{0} controller has shut down")]
    ControllerClosed(&'static str),
}
